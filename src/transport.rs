//! Transport abstraction for talking to the collection service.
//!
//! The reporting layer never touches HTTP directly: it builds an
//! [`HttpRequest`] and hands it to a [`Transport`]. This keeps the clients
//! testable with an in-memory transport and lets callers plug in their own
//! HTTP stack.
//!
//! ```text
//!   ReportingApi ── HttpRequest ──► Transport::send ──► Response
//!                                        │
//!                                        └── HttpTransport (reqwest)
//! ```
//!
//! # Built-in Transports
//!
//! | Transport | Module | Description |
//! |-----------|--------|-------------|
//! | HTTP | [`http`] | reqwest client with bearer auth and connection pooling |
//!
//! Implementations must be safe to share between threads and runtimes. A
//! single transport instance is used by a client and all of its forks.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ReportResult;
use crate::model::Id;

pub use http::HttpTransport;

/// HTTP method of a reporting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Multipart(Vec<Part>),
}

/// A request to the collection service.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the service endpoint, e.g. `api/v2/demo/launch`.
    pub path: String,
    pub body: Body,
    /// Reporting operation issuing the request, for logging.
    pub operation: &'static str,
}

impl HttpRequest {
    pub fn get(operation: &'static str, path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: Body::Empty,
            operation,
        }
    }

    pub fn post(operation: &'static str, path: impl Into<String>, json: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Body::Json(json),
            operation,
        }
    }

    pub fn put(operation: &'static str, path: impl Into<String>, json: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Body::Json(json),
            operation,
        }
    }

    pub fn multipart(operation: &'static str, path: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Body::Multipart(parts),
            operation,
        }
    }
}

/// A decoded service response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Parsed JSON body, or `Value::Null` if the body was empty or not JSON.
    pub json: Value,
}

impl Response {
    pub fn new(status: u16, json: Value) -> Self {
        Self { status, json }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `id` field of the body, if present.
    pub fn id(&self) -> Option<Id> {
        self.json.get("id").and_then(value_as_id)
    }

    /// The `message` field of the body, if present.
    pub fn message(&self) -> Option<String> {
        self.json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Per-entry results of a batch call.
    ///
    /// Each entry of `responses` contributes its `id`, or its `message` when
    /// it has no id.
    pub fn messages(&self) -> Vec<String> {
        self.json
            .get("responses")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .get("id")
                            .and_then(value_as_id)
                            .map(|id| id.to_string())
                            .or_else(|| {
                                entry
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                            })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn value_as_id(value: &Value) -> Option<Id> {
    match value {
        Value::String(s) => Some(Id::new(s.as_str())),
        Value::Number(n) => Some(Id::new(n.to_string())),
        _ => None,
    }
}

/// Sends requests to the collection service.
///
/// `send` resolves to `Ok` for any response the service returned, whatever
/// its status; status interpretation is left to the caller. `Err` means no
/// usable response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> ReportResult<Response>;

    /// Releases pooled connections. Requests sent afterwards fail with
    /// [`ReportError::Transport`](crate::error::ReportError::Transport).
    /// Transports holding no connections keep the default no-op.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_id() {
        let response = Response::new(201, json!({"id": "abc"}));
        assert!(response.is_success());
        assert_eq!(response.id(), Some(Id::new("abc")));

        let numeric = Response::new(200, json!({"id": 42}));
        assert_eq!(numeric.id(), Some(Id::new("42")));

        let missing = Response::new(200, json!({"message": "ok"}));
        assert_eq!(missing.id(), None);
        assert_eq!(missing.message().as_deref(), Some("ok"));
    }

    #[test]
    fn test_response_messages() {
        let response = Response::new(
            201,
            json!({"responses": [{"id": "log-1"}, {"message": "bad file"}, {}]}),
        );
        assert_eq!(response.messages(), vec!["log-1", "bad file"]);
        assert!(Response::new(200, Value::Null).messages().is_empty());
    }

    #[test]
    fn test_non_success_status() {
        assert!(!Response::new(404, Value::Null).is_success());
        assert!(!Response::new(199, Value::Null).is_success());
    }
}
