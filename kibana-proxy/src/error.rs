//! Error types for proxy operations

use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::Full;
use kibana_tenancy::MembershipError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Upstream did not respond within {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Failed to filter upstream response: {0}")]
    Filter(#[from] FilterError),

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    ClientBody(String),

    #[error("Membership lookup failed: {0}")]
    Membership(#[from] MembershipError),
}

impl ProxyError {
    /// HTTP status reported to the client for this failure
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream(_) | ProxyError::Filter(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Membership(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidUri(_) | ProxyError::ClientBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Validation(_)
            | ProxyError::ConfigLoad { .. }
            | ProxyError::ConfigParse(_)
            | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert the error into a complete plain-text response
    pub fn to_response(&self) -> Response<Full<Bytes>> {
        let status = self.status();
        let message = match self {
            ProxyError::Upstream(_) => "Failed to reach the search backend.",
            ProxyError::Filter(_) => "The search backend returned a response that could not be filtered.",
            ProxyError::UpstreamTimeout(_) => "The search backend did not respond in time.",
            ProxyError::Membership(_) => "Project membership is temporarily unavailable.",
            ProxyError::BodyTooLarge { .. } => "Request body is too large to inspect.",
            ProxyError::InvalidUri(_) => "Invalid request URI.",
            ProxyError::ClientBody(_) => "Request body could not be read.",
            _ => "Internal proxy error.",
        };

        plain_text_response(status, message)
    }
}

/// Build a `text/plain` response whose body starts with the status line text
pub(crate) fn plain_text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = format!(
        "{} {}\n\n{}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        message
    );

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid upstream URL {url}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("Invalid mount path: {path}")]
    InvalidMountPath { path: String },

    #[error("Invalid listen address: {addr}")]
    InvalidListen { addr: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid identity header name: {name}")]
    InvalidHeader { name: String },

    #[error("Setting {field} must not be empty")]
    Empty { field: String },

    #[error("Empty index granted to principal {principal}")]
    EmptyIndex { principal: String },
}

/// Failures while rewriting a response body
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Failed to decompress body: {0}")]
    Decode(#[source] std::io::Error),

    #[error("Failed to compress body: {0}")]
    Encode(#[source] std::io::Error),

    #[error("Body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response has no hits.hits array")]
    MissingHits,

    #[error("Response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::Upstream("reset".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Filter(FilterError::MissingHits).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Filter(FilterError::TooLarge { limit: 10 }).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout(std::time::Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::BodyTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_error_response_is_complete() {
        let response = ProxyError::Upstream("connection refused".into()).to_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
