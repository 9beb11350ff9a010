//! HTTP transport for the forum backend.
//!
//! Every call either yields the decoded JSON body or a classified
//! [`ForumError`]: `Connectivity` when no response was obtained,
//! `Application` when the backend answered with an error.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::ApiErrorBody;
use crate::error::{ForumError, Result};

const MAX_LOG_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    };
    f.write_str(name)
  }
}

/// A single backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub token: Option<String>,
}

impl ApiRequest {
  pub fn new(method: Method, path: &str) -> Self {
    Self {
      method,
      path: path.to_string(),
      query: Vec::new(),
      body: None,
      token: None,
    }
  }

  pub fn get(path: &str) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: &str, body: Value) -> Self {
    Self::new(Method::Post, path).body(body)
  }

  pub fn put(path: &str, body: Value) -> Self {
    Self::new(Method::Put, path).body(body)
  }

  pub fn delete(path: &str, body: Value) -> Self {
    Self::new(Method::Delete, path).body(body)
  }

  pub fn query(mut self, name: &str, value: impl ToString) -> Self {
    self.query.push((name.to_string(), value.to_string()));
    self
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn bearer(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  /// Method, path and query, e.g. `GET /thread?id=5`.
  pub fn route(&self) -> String {
    if self.query.is_empty() {
      return format!("{} {}", self.method, self.path);
    }
    let query: Vec<String> = self
      .query
      .iter()
      .map(|(name, value)| format!("{}={}", name, value))
      .collect();
    format!("{} {}?{}", self.method, self.path, query.join("&"))
  }
}

/// The seam between typed forum operations and the network.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: ApiRequest) -> Result<Value>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  /// Create a transport for the backend at `base_url`.
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    // Keep any path prefix when joining relative routes
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized)
      .map_err(|e| ForumError::validation(format!("Invalid API url {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ForumError::validation(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  fn url(&self, request: &ApiRequest) -> Result<Url> {
    let mut url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| ForumError::validation(format!("Invalid path {}: {}", request.path, e)))?;
    if !request.query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
  }

  fn headers(token: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(token) = token {
      let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ForumError::validation("Invalid access token format"))?;
      headers.insert(AUTHORIZATION, auth_value);
    }

    Ok(headers)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: ApiRequest) -> Result<Value> {
    let url = self.url(&request)?;
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    debug!("{}", request.route());

    let mut builder = self
      .client
      .request(method, url)
      .headers(Self::headers(request.token.as_deref())?);
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify_send_error)?;
    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| ForumError::connectivity(format!("Failed to read response body: {}", e)))?;

    parse_body(status.as_u16(), status.is_success(), &body)
  }
}

/// No response was obtained, except for requests that could not be built.
fn classify_send_error(err: reqwest::Error) -> ForumError {
  if err.is_builder() {
    ForumError::validation(format!("Invalid request: {}", err))
  } else {
    ForumError::connectivity(err.to_string())
  }
}

/// Turn a response into JSON or an application error.
///
/// An `{"error": ...}` payload is an error even with a success status.
fn parse_body(status: u16, success: bool, body: &str) -> Result<Value> {
  if !success {
    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
      preview.push_str("...");
    }
    debug!("API response error ({}): {}", status, preview);

    let message = match serde_json::from_str::<ApiErrorBody>(body) {
      Ok(error) => error.error,
      Err(_) if preview.trim().is_empty() => format!("Request failed with status {}", status),
      Err(_) => preview,
    };
    return Err(ForumError::application(Some(status), message));
  }

  if body.trim().is_empty() {
    return Ok(Value::Null);
  }

  let value: Value = serde_json::from_str(body)
    .map_err(|e| ForumError::decode(format!("Failed to parse response: {}", e)))?;

  if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
    let message = error
      .as_str()
      .map(String::from)
      .unwrap_or_else(|| error.to_string());
    return Err(ForumError::application(None, message));
  }

  Ok(value)
}

#[cfg(test)]
pub mod mock {
  //! Scripted in-memory transport for tests.

  use super::*;
  use std::collections::{HashMap, VecDeque};
  use std::sync::Mutex;

  /// Answers requests by route. Routes without a script behave as if the
  /// backend were unreachable. The last scripted answer for a route repeats.
  #[derive(Default)]
  pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    requests: Mutex<Vec<ApiRequest>>,
  }

  impl MockTransport {
    pub fn new() -> Self {
      Self::default()
    }

    /// Script the next answer for a route such as `GET /thread?id=5`.
    pub fn respond(&self, route: &str, answer: Result<Value>) {
      self
        .routes
        .lock()
        .unwrap()
        .entry(route.to_string())
        .or_default()
        .push_back(answer);
    }

    /// Replace all scripted answers for a route.
    pub fn set(&self, route: &str, answer: Result<Value>) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(route.to_string(), VecDeque::from([answer]));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
      self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, route: &str) -> usize {
      self
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.route() == route)
        .count()
    }
  }

  #[async_trait]
  impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
      let route = request.route();
      self.requests.lock().unwrap().push(request);

      let mut routes = self.routes.lock().unwrap();
      match routes.get_mut(&route) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) if !queue.is_empty() => queue[0].clone(),
        _ => Err(ForumError::connectivity(format!("unreachable: {}", route))),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::sync::Mutex;

  fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
  }

  /// Serve one scripted response per connection and capture request heads.
  async fn start_mock_server(
    responses: Vec<(u16, &'static str)>,
  ) -> (String, Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    let captured = Arc::new(Mutex::new(Vec::new()));
    let captured_clone = Arc::clone(&captured);

    let handle = tokio::spawn(async move {
      for (status, body) in responses {
        let (mut stream, _) = match listener.accept().await {
          Ok(value) => value,
          Err(_) => break,
        };

        let mut buffer = Vec::new();
        while header_end_offset(&buffer).is_none() {
          let mut chunk = [0_u8; 2048];
          let read = stream.read(&mut chunk).await.unwrap_or(0);
          if read == 0 {
            break;
          }
          buffer.extend_from_slice(&chunk[..read]);
        }
        let head_end = header_end_offset(&buffer).unwrap_or(buffer.len());
        captured_clone
          .lock()
          .await
          .push(String::from_utf8_lossy(&buffer[..head_end]).to_string());

        let response = format!(
          "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
          status,
          body.len(),
          body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.flush().await;
      }
    });

    (format!("http://{}", addr), captured, handle)
  }

  fn transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(base_url, Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_route_includes_query() {
    let request = ApiRequest::get("/thread").query("id", 5);
    assert_eq!(request.route(), "GET /thread?id=5");
    assert_eq!(ApiRequest::post("/thread", json!({})).route(), "POST /thread");
  }

  #[test]
  fn test_url_keeps_base_path() {
    let transport = transport("http://localhost:5005/api/");
    let url = transport
      .url(&ApiRequest::get("/threads").query("start", 0))
      .unwrap();
    assert_eq!(url.as_str(), "http://localhost:5005/api/threads?start=0");
  }

  #[test]
  fn test_error_status_is_application_error() {
    let err = parse_body(403, false, r#"{"error":"Forbidden"}"#).unwrap_err();
    assert!(matches!(
      err,
      ForumError::Application { status: Some(403), ref message } if message == "Forbidden"
    ));
  }

  #[test]
  fn test_error_payload_with_success_status() {
    let err = parse_body(200, true, r#"{"error":"Invalid input"}"#).unwrap_err();
    assert!(matches!(err, ForumError::Application { status: None, .. }));
  }

  #[test]
  fn test_success_body() {
    assert_eq!(parse_body(200, true, r#"{"id":3}"#).unwrap(), json!({"id": 3}));
    assert_eq!(parse_body(200, true, "").unwrap(), Value::Null);
    assert!(matches!(
      parse_body(200, true, "<html>"),
      Err(ForumError::Decode(_))
    ));
  }

  #[tokio::test]
  async fn test_sends_bearer_token_and_query() {
    let (base_url, captured, server) =
      start_mock_server(vec![(200, r#"{"id":5,"title":"t"}"#)]).await;

    let value = transport(&base_url)
      .send(
        ApiRequest::get("/thread")
          .query("id", 5)
          .bearer(Some("secret".to_string())),
      )
      .await
      .unwrap();
    assert_eq!(value["id"], 5);

    let heads = captured.lock().await.clone();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].starts_with("GET /thread?id=5 "));
    assert!(heads[0].to_lowercase().contains("authorization: bearer secret"));

    server.abort();
  }

  #[tokio::test]
  async fn test_http_error_status_is_not_connectivity() {
    let (base_url, _captured, server) =
      start_mock_server(vec![(404, r#"{"error":"Thread not found"}"#)]).await;

    let err = transport(&base_url)
      .send(ApiRequest::get("/thread").query("id", 99))
      .await
      .unwrap_err();
    assert!(!err.is_connectivity());
    assert_eq!(err.status_code(), Some(404));

    server.abort();
  }

  #[tokio::test]
  async fn test_refused_connection_is_connectivity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = transport(&format!("http://{}", addr))
      .send(ApiRequest::get("/thread").query("id", 5))
      .await
      .unwrap_err();
    assert!(err.is_connectivity());
  }

  #[tokio::test]
  async fn test_timeout_is_connectivity() {
    // Accept the connection but never answer
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
      let mut held = Vec::new();
      while let Ok((stream, _)) = listener.accept().await {
        held.push(stream);
      }
    });

    let transport =
      HttpTransport::new(&format!("http://{}", addr), Duration::from_millis(300)).unwrap();
    let err = transport
      .send(ApiRequest::get("/thread").query("id", 5))
      .await
      .unwrap_err();
    assert!(err.is_connectivity());

    server.abort();
  }
}
