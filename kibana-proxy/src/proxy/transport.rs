//! Backend transport: executes one request against the upstream

use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type used for every request and response the proxy produces
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Forwards a fully built request and returns the upstream response.
///
/// Dropping the returned future aborts the in-flight request; dropping the
/// response body releases the connection.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request<ProxyBody>,
    ) -> impl Future<Output = Result<Response<ProxyBody>>> + Send;
}

/// Pooled HTTP/1 client for the configured upstream
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, ProxyBody>,
    timeout: Duration,
}

impl HyperTransport {
    /// Create a transport whose calls fail after `timeout` without response headers
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(timeout));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self { client, timeout }
    }
}

impl Transport for HyperTransport {
    async fn send(&self, request: Request<ProxyBody>) -> Result<Response<ProxyBody>> {
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.timeout, "Upstream request timed out");
                ProxyError::UpstreamTimeout(self.timeout)
            })?
            .map_err(map_client_error)?;

        Ok(response.map(|body| body.map_err(|e| -> BoxError { Box::new(e) }).boxed_unsync()))
    }
}

/// Map client errors onto the upstream failure taxonomy
fn map_client_error(e: hyper_util::client::legacy::Error) -> ProxyError {
    if e.is_connect() {
        warn!(error = %e, "Upstream connection failed");
        return ProxyError::Upstream(format!("Failed to connect to upstream: {}", e));
    }

    warn!(error = %e, "Upstream error");
    ProxyError::Upstream(format!("Upstream error: {}", e))
}
