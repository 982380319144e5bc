//! Per-request control flow.
//!
//! ```text
//! Received ──► Classified ──► Denied (403, nothing sent upstream)
//!                  │
//!                  └──► Authorized ──► Forwarded ──► Filtered | PassThrough ──► Completed
//!                                          │
//!                                          └──► Aborted (502/504)
//! ```
//!
//! Missing principals and unresolvable target indices end the request
//! before classification completes (403 / 400). The bypass principal skips
//! straight to forwarding and is never filtered.

use super::headers::{append_forwarded, end_to_end};
use super::transport::{BoxError, ProxyBody, Transport};
use super::upstream::UpstreamTarget;
use crate::config::Config;
use crate::error::{plain_text_response, FilterError, ProxyError, Result};
use crate::filter::ResponseFilter;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{request, response, Request, Response, StatusCode};
use http_body_util::{BodyExt, Collected, Empty, Full, LengthLimitError, Limited};
use std::future::Future;
use hyper::body::Body;
use hyper::ext::ReasonPhrase;
use kibana_tenancy::{
    Authorizer, Classification, FilterPolicy, MembershipSet, MembershipSource, Principal,
    Rejection,
};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the server knows about a request besides its HTTP content
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Principal established by the identity layer, if any
    pub principal: Option<Principal>,
    /// Address of the connecting client
    pub client_addr: Option<IpAddr>,
}

/// Orchestrates classification, authorization, forwarding and filtering
pub struct ProxyController<T, M> {
    transport: T,
    membership: M,
    authorizer: Authorizer,
    filter: ResponseFilter,
    upstream: UpstreamTarget,
    max_body_bytes: usize,
    max_response_bytes: usize,
    body_timeout: Duration,
    log_requests: bool,
}

impl<T: Transport, M: MembershipSource> ProxyController<T, M> {
    pub fn new(transport: T, membership: M, config: &Config) -> Result<Self> {
        let authorizer = config.authorizer();
        Ok(Self {
            transport,
            membership,
            filter: ResponseFilter::new(authorizer.clone(), config.upstream.max_response_bytes),
            authorizer,
            upstream: UpstreamTarget::new(&config.upstream.url, &config.server.mount_path)?,
            max_body_bytes: config.server.max_body_bytes,
            max_response_bytes: config.upstream.max_response_bytes,
            body_timeout: config.upstream.timeout(),
            log_requests: config.logging.log_requests,
        })
    }

    /// Handle one request. Every outcome, including faults, is a complete response.
    pub async fn handle<B>(&self, request: Request<B>, ctx: RequestContext) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let method = request.method().clone();
        let uri = request.uri().clone();

        match self.process(request, ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, %uri, error = %e, "Request failed");
                e.to_response().map(full_body)
            }
        }
    }

    async fn process<B>(&self, request: Request<B>, ctx: RequestContext) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let Some(principal) = ctx.principal else {
            return Ok(reject(&Rejection::Unauthenticated));
        };
        let (parts, body) = request.into_parts();

        if self.authorizer.is_bypass(&principal) {
            debug!(%principal, uri = %parts.uri, "Bypass principal, forwarding unfiltered");
            let body = declared_body(&parts.headers, body);
            let outbound = self.outbound(&parts, body, ctx.client_addr, FilterPolicy::None)?;
            let response = self.forward(&parts, outbound).await?;
            return Ok(self.pass_through(response));
        }

        // Classify the path the upstream receives, not the mounted one
        let path = self.upstream.route_path(parts.uri.path());
        let policy = FilterPolicy::from_path(path);

        let (body, inspected) = if policy.inspects_request_body() {
            let bytes = self.buffer_body(body).await?;
            (full_body(Full::new(bytes.clone())), bytes)
        } else {
            (declared_body(&parts.headers, body), Bytes::new())
        };

        let classification = match Classification::extract(policy, path, &inspected) {
            Ok(classification) => classification,
            Err(rejection) => {
                debug!(%principal, %policy, %rejection, "Could not classify request");
                return Ok(reject(&rejection));
            }
        };
        debug!(%principal, %policy, index = ?classification.index, "Classified request");

        let membership = if policy.authorizes_before_forward() || policy.filters_response() {
            self.membership.indices_for(&principal).await?
        } else {
            MembershipSet::default()
        };

        if policy.authorizes_before_forward() {
            let Some(index) = classification.index.as_ref() else {
                return Ok(reject(&Rejection::Malformed {
                    reason: "no target index".to_string(),
                }));
            };
            if !self
                .authorizer
                .authorize(&principal, index.as_str(), &membership)
                .is_allowed()
            {
                warn!(%principal, %index, "Denied access to index");
                return Ok(reject(&Rejection::Denied {
                    index: index.clone(),
                }));
            }
        }

        let outbound = self.outbound(&parts, body, ctx.client_addr, policy)?;
        let response = self.forward(&parts, outbound).await?;

        // Error responses carry no hits; only successful listings are rewritten
        if policy.filters_response() && response.status().is_success() {
            self.filter_response(response, &classification, &membership)
                .await
        } else {
            Ok(self.pass_through(response))
        }
    }

    /// Read a body that must be inspected, bounded by the configured limit
    async fn buffer_body<B>(&self, body: B) -> Result<Bytes>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match collect_limited(body, self.max_body_bytes).await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(ProxyError::BodyTooLarge {
                    limit: self.max_body_bytes,
                })
            }
            Err(e) => Err(ProxyError::ClientBody(e.to_string())),
        }
    }

    /// Build the upstream request from the inbound parts
    fn outbound(
        &self,
        parts: &request::Parts,
        body: ProxyBody,
        client_addr: Option<IpAddr>,
        policy: FilterPolicy,
    ) -> Result<Request<ProxyBody>> {
        let mut headers = end_to_end(&parts.headers);
        headers.insert(header::HOST, self.upstream.host_header().clone());
        append_forwarded(&mut headers, client_addr);
        if policy.filters_response() {
            // The codec only understands gzip and identity
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method.clone();
        *outbound.uri_mut() = self.upstream.target_uri(&parts.uri)?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    async fn forward(
        &self,
        parts: &request::Parts,
        outbound: Request<ProxyBody>,
    ) -> Result<Response<ProxyBody>> {
        if self.log_requests {
            info!(
                method = %parts.method,
                uri = %parts.uri,
                upstream = %outbound.uri(),
                "Proxying request"
            );
        }
        self.transport.send(outbound).await
    }

    /// Relay an upstream response without touching its body
    fn pass_through(&self, response: Response<ProxyBody>) -> Response<ProxyBody> {
        let (parts, body) = response.into_parts();
        let mut headers = end_to_end(&parts.headers);
        self.rewrite_location(parts.status, &mut headers);

        let body = if parts.status == StatusCode::NOT_MODIFIED {
            empty_body()
        } else {
            body
        };
        build_response(&parts, headers, body)
    }

    /// Buffer, filter and re-encode an index pattern listing
    async fn filter_response(
        &self,
        response: Response<ProxyBody>,
        classification: &Classification,
        membership: &MembershipSet,
    ) -> Result<Response<ProxyBody>> {
        let (parts, body) = response.into_parts();
        let limit = self.max_response_bytes;
        let raw = tokio::time::timeout(self.body_timeout, collect_limited(body, limit))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.body_timeout))?
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    ProxyError::Filter(FilterError::TooLarge { limit })
                } else {
                    ProxyError::Upstream(format!("Failed to read upstream body: {}", e))
                }
            })?
            .to_bytes();

        let filtered = self.filter.rewrite(
            classification.policy,
            classification.index.as_ref(),
            membership,
            &parts.headers,
            raw,
        )?;

        let mut headers = end_to_end(&parts.headers);
        match filtered.coding.header_value() {
            Some(coding) => headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(coding)),
            None => headers.remove(header::CONTENT_ENCODING),
        };
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(filtered.body.len()));

        Ok(build_response(&parts, headers, full_body(Full::new(filtered.body))))
    }

    fn rewrite_location(&self, status: StatusCode, headers: &mut HeaderMap) {
        if !status.is_redirection() {
            return;
        }

        let rewritten = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| self.upstream.rewrite_location(location));

        if let Some(value) = rewritten.and_then(|l| HeaderValue::from_str(&l).ok()) {
            headers.insert(header::LOCATION, value);
        }
    }
}

/// Collect a body up to `limit` bytes.
///
/// Declaring the future `Send` here, where lifetimes are concrete, works
/// around rustc failing to prove it inside the callers' async bodies.
fn collect_limited<B>(
    body: B,
    limit: usize,
) -> impl Future<Output = std::result::Result<Collected<Bytes>, BoxError>> + Send
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    Limited::new(body, limit).collect()
}

/// Attach the inbound body only if the request declared one.
///
/// A declared `Content-Length` bounds how much is read.
fn declared_body<B>(headers: &HeaderMap, body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    if let Some(length) = content_length {
        Limited::new(body, length).boxed_unsync()
    } else if headers.contains_key(header::CONTENT_LENGTH)
        || headers.contains_key(header::TRANSFER_ENCODING)
    {
        body.map_err(|e| -> BoxError { e.into() }).boxed_unsync()
    } else {
        empty_body()
    }
}

fn build_response(
    upstream: &response::Parts,
    headers: HeaderMap,
    body: ProxyBody,
) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = upstream.status;
    *response.headers_mut() = headers;
    if let Some(reason) = upstream.extensions.get::<ReasonPhrase>() {
        response.extensions_mut().insert(reason.clone());
    }
    response
}

fn reject(rejection: &Rejection) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::FORBIDDEN);
    plain_text_response(status, &rejection.to_string()).map(full_body)
}

fn full_body(body: Full<Bytes>) -> ProxyBody {
    body.map_err(|never| match never {}).boxed_unsync()
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}
