//! HTTP transport backed by reqwest.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part as FormPart};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Body, HttpRequest, Method, Response, Transport};
use crate::error::{ReportError, ReportResult};

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum number of idle pooled connections per host.
pub const DEFAULT_MAX_POOL_SIZE: usize = 50;

/// Sends requests over HTTP with bearer authentication.
///
/// After [`close`](Transport::close) the pooled connections are released and
/// every further request fails with [`ReportError::Transport`].
#[derive(Debug)]
pub struct HttpTransport {
    client: RwLock<Option<Client>>,
    endpoint: Url,
    api_key: String,
}

impl HttpTransport {
    /// Creates a transport for the service at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Config`] if the endpoint is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        max_pool_size: usize,
    ) -> ReportResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            warn!("No API key configured; requests will be sent unauthenticated");
        }

        // A trailing slash makes relative paths join under the endpoint
        // instead of replacing its last segment.
        let base = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{}/", endpoint)
        };
        let endpoint = Url::parse(&base)
            .map_err(|e| ReportError::Config(format!("Invalid endpoint '{}': {}", base, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_pool_size)
            .build()
            .map_err(|e| ReportError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client: RwLock::new(Some(client)),
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn client(&self, operation: &str) -> ReportResult<Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ReportError::transport(operation, None, "transport is closed"))
    }

    fn url(&self, request: &HttpRequest) -> ReportResult<Url> {
        self.endpoint
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| {
                ReportError::transport(
                    request.operation,
                    None,
                    format!("Invalid path '{}': {}", request.path, e),
                )
            })
    }
}

fn form(operation: &str, parts: Vec<super::Part>) -> ReportResult<Form> {
    let mut form = Form::new();
    for part in parts {
        let mut field = FormPart::bytes(part.bytes)
            .mime_str(&part.content_type)
            .map_err(|e| {
                ReportError::transport(
                    operation,
                    None,
                    format!("Invalid content type '{}': {}", part.content_type, e),
                )
            })?;
        if let Some(filename) = part.filename {
            field = field.file_name(filename);
        }
        form = form.part(part.name, field);
    }
    Ok(form)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> ReportResult<Response> {
        let operation = request.operation;
        let client = self.client(operation)?;
        let url = self.url(&request)?;
        debug!("{} {} ({})", request.method.as_str(), url, operation);

        let builder = match request.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url),
            Method::Put => client.put(url),
        };
        let builder = if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        };
        let builder = match request.body {
            Body::Empty => builder,
            Body::Json(json) => builder.json(&json),
            Body::Multipart(parts) => builder.multipart(form(operation, parts)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ReportError::transport(operation, None, e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ReportError::transport(operation, Some(status), e.to_string()))?;
        let json = serde_json::from_str(&text).unwrap_or(Value::Null);

        Ok(Response::new(status, json))
    }

    fn close(&self) {
        let client = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            debug!("Closed HTTP transport for {}", self.endpoint);
        }
    }
}
