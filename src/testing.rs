//! In-memory transport for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{ReportError, ReportResult};
use crate::request::JSON_PART_NAME;
use crate::transport::{Body, HttpRequest, Method, Response, Transport};

/// Records every request and answers like the collection service would.
///
/// - `POST .../launch` and `POST .../item[/parent]` return a fresh `id`
/// - `PUT` returns `{"message": "ok"}`
/// - `POST .../log` returns one `responses` entry per record
/// - `GET` returns an empty object
///
/// Rules added with [`respond`](Self::respond) or [`fail`](Self::fail)
/// take precedence, first match wins.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<HttpRequest>>,
    rules: Mutex<Vec<(Method, String, ReportResult<Response>)>>,
    next_id: AtomicUsize,
    delay: Option<Duration>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport that sleeps before answering each request.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn respond(&self, method: Method, path_contains: &str, response: Response) {
        self.rules
            .lock()
            .unwrap()
            .push((method, path_contains.to_string(), Ok(response)));
    }

    /// Fails matching requests as if the network were down.
    pub fn fail(&self, method: Method, path_contains: &str) {
        self.rules.lock().unwrap().push((
            method,
            path_contains.to_string(),
            Err(ReportError::transport("test", None, "connection refused")),
        ));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    /// Operation names in the order requests were received.
    pub fn operations(&self) -> Vec<&'static str> {
        self.requests().into_iter().map(|r| r.operation).collect()
    }

    /// Number of log records carried by each `log_batch` request.
    pub fn log_batch_sizes(&self) -> Vec<usize> {
        self.requests()
            .iter()
            .filter(|r| r.operation == "log_batch")
            .map(log_count)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn answer(&self, request: &HttpRequest) -> ReportResult<Response> {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(method, path, _)| *method == request.method && request.path.contains(path))
            .map(|(_, _, response)| response.clone());
        if let Some(response) = rule {
            return response;
        }

        let response = match request.method {
            Method::Put => Response::new(200, json!({"message": "ok"})),
            Method::Get => Response::new(200, json!({})),
            Method::Post if request.path.ends_with("/log") => {
                let responses: Vec<Value> = (0..log_count(request))
                    .map(|_| json!({"id": self.id("log")}))
                    .collect();
                Response::new(201, json!({"responses": responses}))
            }
            Method::Post if request.path.ends_with("/launch") => {
                Response::new(201, json!({"id": self.id("launch")}))
            }
            Method::Post => Response::new(201, json!({"id": self.id("item")})),
        };
        Ok(response)
    }
}

fn log_count(request: &HttpRequest) -> usize {
    let Body::Multipart(parts) = &request.body else {
        return 0;
    };
    parts
        .iter()
        .find(|p| p.name == JSON_PART_NAME)
        .and_then(|p| serde_json::from_slice::<Value>(&p.bytes).ok())
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0)
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> ReportResult<Response> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(ReportError::transport(
                request.operation,
                None,
                "transport is closed",
            ));
        }
        let response = self.answer(&request);
        self.requests.lock().unwrap().push(request);
        response
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
