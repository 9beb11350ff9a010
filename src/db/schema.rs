/// Schema for the local store.
///
/// `stored_at` is written by the application as RFC 3339 so that cached
/// entries keep sub-second ordering.
pub const SCHEMA: &str = r#"
-- Entity cache (one serialized JSON record per entity)
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_key)
);

-- List query cache (e.g. pages of thread ids)
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL
);

-- Persisted client state (session token, current user, owned threads)
CREATE TABLE IF NOT EXISTS client_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
