use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use surge_core::prelude::{InvokeError, InvokeResult, Invoker, Operation, Response, TargetConfig};
use tokio::time::Instant;
use url::Url;

/// Sends workflow operations to an HTTP service.
///
/// The operation's `method` is the HTTP method and its `path` is joined onto the base URL, so
/// `/users?limit=20` against `http://localhost:8080/api` requests
/// `http://localhost:8080/api/users?limit=20`. Bodies are sent as JSON. The underlying client
/// pools connections and is shared by every virtual user.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    base_url: Url,
    timeout: Option<Duration>,
}

impl HttpInvoker {
    /// Create an invoker for `base_url`, sending `headers` with every request.
    pub fn new(
        base_url: &str,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid target URL `{base_url}`"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Target URL `{base_url}` cannot have paths joined onto it");
        }
        if base_url.query().is_some() || base_url.fragment().is_some() {
            anyhow::bail!("Target URL `{base_url}` must not have a query or fragment");
        }

        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::try_from(name.as_str())
                .with_context(|| format!("Invalid header name `{name}`"))?;
            let mut value = HeaderValue::try_from(value.as_str())
                .with_context(|| format!("Invalid value for header `{name}`"))?;
            value.set_sensitive(true);
            default_headers.insert(name, value);
        }

        let mut builder = Client::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        log::debug!("Created HTTP invoker for {base_url}");

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Create an invoker from the run's target configuration. A base URL is required.
    pub fn from_target(target: &TargetConfig) -> anyhow::Result<Self> {
        let base_url = target
            .base_url
            .as_deref()
            .context("No target URL configured, pass `--target` or set `SURGE_TARGET`")?;

        Self::new(base_url, &target.headers, target.timeout)
    }

    fn map_error(&self, e: reqwest::Error) -> InvokeError {
        if e.is_timeout() {
            InvokeError::Timeout(self.timeout.unwrap_or_default())
        } else {
            InvokeError::Transport(e.to_string())
        }
    }
}

impl Invoker for HttpInvoker {
    fn invoke(&self, operation: Operation) -> BoxFuture<'_, InvokeResult> {
        async move {
            let url = join_url(&self.base_url, &operation.path);
            let method = Method::from_bytes(operation.method.as_bytes()).map_err(|_| {
                InvokeError::Render(format!("Invalid HTTP method `{}`", operation.method))
            })?;

            let mut request = self.client.request(method, url);
            for (name, value) in &operation.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &operation.body {
                request = request.json(body);
            }

            let start = Instant::now();
            let response = request.send().await.map_err(|e| self.map_error(e))?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|e| self.map_error(e))?;

            Ok(Response::new(status, body, start.elapsed()))
        }
        .boxed()
    }
}

/// Append `path` to the base URL's path. A query string in `path` becomes the query.
fn join_url(base: &Url, path: &str) -> Url {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    url.set_query(query);
    url.set_fragment(None);
    url
}
