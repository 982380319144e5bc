use super::controller::{ProxyController, RequestContext};
use super::identity::IdentityExtractor;
use super::transport::Transport;
use crate::error::Result;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use kibana_tenancy::MembershipSource;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How long open connections get to finish in-flight requests on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Address to accept client connections on
    pub listen: SocketAddr,
    /// Source of the authenticated principal for each request
    pub identity: IdentityExtractor,
}

/// HTTP/1.1 reverse proxy server
pub struct ProxyServer<T, M> {
    listen: SocketAddr,
    identity: Arc<IdentityExtractor>,
    controller: Arc<ProxyController<T, M>>,
}

impl<T, M> ProxyServer<T, M>
where
    T: Transport + 'static,
    M: MembershipSource + 'static,
{
    pub fn new(config: ProxyServerConfig, controller: ProxyController<T, M>) -> Self {
        Self {
            listen: config.listen,
            identity: Arc::new(config.identity),
            controller: Arc::new(controller),
        }
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        info!("Proxy listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener`, one task per connection.
    ///
    /// Returns once `shutdown` is cancelled and every open connection has
    /// drained or hit the drain timeout.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            tracker.spawn(serve_connection(
                stream,
                peer,
                Arc::clone(&self.identity),
                Arc::clone(&self.controller),
                shutdown.clone(),
            ));
        }

        tracker.close();
        info!(open = tracker.len(), "Shutting down, draining connections");
        tracker.wait().await;
        Ok(())
    }
}

/// Serve HTTP/1.1 requests on one client connection
async fn serve_connection<T, M>(
    stream: TcpStream,
    peer: SocketAddr,
    identity: Arc<IdentityExtractor>,
    controller: Arc<ProxyController<T, M>>,
    shutdown: CancellationToken,
) where
    T: Transport + 'static,
    M: MembershipSource + 'static,
{
    debug!(%peer, "Client connected");

    let service = service_fn(move |mut request: Request<Incoming>| {
        let identity = Arc::clone(&identity);
        let controller = Arc::clone(&controller);
        async move {
            let principal = identity.extract(request.headers_mut(), peer.ip());
            let ctx = RequestContext {
                principal,
                client_addr: Some(peer.ip()),
            };
            Ok::<_, Infallible>(controller.handle(request, ctx).await)
        }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(%peer, error = %e, "Connection error");
            }
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if tokio::time::timeout(DRAIN_TIMEOUT, conn.as_mut()).await.is_err() {
                warn!(%peer, "Connection did not drain in time, closing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, IdentityConfig};
    use crate::proxy::HyperTransport;
    use bytes::Bytes;
    use http::{HeaderValue, Response, StatusCode};
    use http_body_util::{BodyExt, Full};
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioExecutor;
    use kibana_tenancy::StaticMembership;

    /// Minimal backend that reports whether it saw an identity header
    async fn spawn_upstream(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| async move {
                        let saw = if request.headers().contains_key("x-remote-user") {
                            "yes"
                        } else {
                            "no"
                        };
                        let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                        response
                            .headers_mut()
                            .insert("x-saw-identity", HeaderValue::from_static(saw));
                        Ok::<_, Infallible>(response)
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }

    async fn spawn_proxy(
        upstream: SocketAddr,
        shutdown: CancellationToken,
    ) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let mut config = Config::default();
        config.upstream.url = format!("http://{}", upstream);
        config
            .membership
            .insert("alice@example.com".to_string(), vec!["proj_a".to_string()]);

        let controller: ProxyController<HyperTransport, StaticMembership> = ProxyController::new(
            HyperTransport::new(config.upstream.timeout()),
            config.static_membership(),
            &config,
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ProxyServer::new(
            ProxyServerConfig {
                listen: addr,
                identity: IdentityExtractor::from_config(&IdentityConfig::default()).unwrap(),
            },
            controller,
        );

        let handle = tokio::spawn(async move { server.serve(listener, shutdown).await });
        (addr, handle)
    }

    async fn get(proxy: SocketAddr, path: &str, user: Option<&str>) -> Response<Incoming> {
        let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let mut builder = Request::builder().uri(format!("http://{}{}", proxy, path));
        if let Some(user) = user {
            builder = builder.header("x-remote-user", user);
        }
        client
            .request(builder.body(Full::new(Bytes::new())).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_authorization() {
        let upstream = spawn_upstream(r#"{"_id":"proj_a"}"#).await;
        let shutdown = CancellationToken::new();
        let (proxy, handle) = spawn_proxy(upstream, shutdown.clone()).await;

        let denied = get(
            proxy,
            "/hopsworks-api/kibana/elasticsearch/.kibana/index-pattern/proj_b",
            Some("alice@example.com"),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = get(
            proxy,
            "/hopsworks-api/kibana/elasticsearch/.kibana/index-pattern/proj_a",
            Some("alice@example.com"),
        )
        .await;
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(allowed.headers().get("x-saw-identity").unwrap(), "no");
        let body = allowed.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"_id":"proj_a"}"#);

        let anonymous = get(proxy, "/hopsworks-api/kibana/app/kibana", None).await;
        assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        // Bind then drop to get a port nothing listens on
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let (proxy, handle) = spawn_proxy(unused, shutdown.clone()).await;

        let response = get(proxy, "/hopsworks-api/kibana/app/kibana", Some("alice@example.com")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
