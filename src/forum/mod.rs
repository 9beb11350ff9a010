pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod session;
pub mod transport;
pub mod tree;
pub mod types;
