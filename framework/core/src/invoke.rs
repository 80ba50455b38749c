use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

/// A single request against the target service.
///
/// The runner renders one of these for every workflow step. What `method` and `path` mean is up
/// to the [Invoker], the HTTP binding treats them as an HTTP method and a path relative to the
/// target's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

impl Operation {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// What the target service answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
    /// Time taken by the invocation as measured by the invoker.
    pub latency: Duration,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>, latency: Duration) -> Self {
        Self {
            status,
            body: body.into(),
            latency,
        }
    }

    /// Status codes 200 to 399 are a successful exchange.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body parses to `None`.
    pub fn json(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }

        serde_json::from_slice(&self.body).ok()
    }
}

/// Reasons an invocation produced no response.
///
/// None of these abort an iteration. They are handed to the step's checks like any response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Could not build the request: {0}")]
    Render(String),
}

pub type InvokeResult = Result<Response, InvokeError>;

/// The capability to talk to the target service.
///
/// Implementations must be cheap to share between virtual users. Connection pooling, base
/// addresses and credentials are the implementation's concern.
pub trait Invoker: Send + Sync + 'static {
    fn invoke(&self, operation: Operation) -> BoxFuture<'_, InvokeResult>;
}

impl<T: Invoker + ?Sized> Invoker for Arc<T> {
    fn invoke(&self, operation: Operation) -> BoxFuture<'_, InvokeResult> {
        (**self).invoke(operation)
    }
}
