use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw response: status plus decoded JSON body (`Null` when empty).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub json: Value,
}

/// Typed request failure. `Clone` so one fetch result can be handed to every
/// query waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    Validation(String),
    Conflict {
        message: String,
        conflicting_id: Option<String>,
    },
    NotFound(String),
    Status {
        status: u16,
        message: String,
    },
    Transport(String),
    Timeout,
    Decode(String),
}

impl RequestError {
    /// Transport-class failures: the request may not have been served.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Transport(_) | RequestError::Timeout => true,
            RequestError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Validation(msg) => write!(f, "validation error: {msg}"),
            RequestError::Conflict { message, .. } => write!(f, "conflict: {message}"),
            RequestError::NotFound(msg) => write!(f, "not found: {msg}"),
            RequestError::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            RequestError::Transport(msg) => write!(f, "transport error: {msg}"),
            RequestError::Timeout => write!(f, "request timed out"),
            RequestError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Issues one HTTP-shaped request. Implementations return `Err` only when no
/// response arrived; error statuses come back as responses.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse, RequestError>;
}

/// Map a response onto the typed error taxonomy.
pub fn into_result(response: TransportResponse) -> Result<Value, RequestError> {
    if (200..300).contains(&response.status) {
        return Ok(response.json);
    }
    let message = response
        .json
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| response.json.to_string());
    Err(match response.status {
        400 => RequestError::Validation(message),
        404 => RequestError::NotFound(message),
        409 => RequestError::Conflict {
            message,
            conflicting_id: response
                .json
                .get("conflicting_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        status => RequestError::Status { status, message },
    })
}

pub async fn call(
    transport: &dyn Transport,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> Result<Value, RequestError> {
    into_result(transport.request(method, path, body).await?)
}

/// Serves requests in-process against an axum `Router`.
#[derive(Clone)]
pub struct LocalTransport {
    router: Router,
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<TransportResponse, RequestError> {
        let builder = Request::builder().method(method.as_str()).uri(path);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .map_err(|e| RequestError::Transport(e.to_string()))?;

        let exchange = async {
            let response = match self.router.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            let status = response.status().as_u16();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?
                .to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| RequestError::Decode(e.to_string()))?
            };
            Ok::<_, RequestError>(TransportResponse { status, json })
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RequestError::Timeout)?
    }
}
