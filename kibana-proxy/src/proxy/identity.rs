//! Principal extraction from the authenticating front end

use crate::config::IdentityConfig;
use crate::error::{Result, ValidationError};
use http::{HeaderMap, HeaderName};
use ipnet::IpNet;
use kibana_tenancy::Principal;
use std::net::IpAddr;
use tracing::debug;

/// Reads the principal from a header, trusting it only from known peers
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    header: HeaderName,
    trusted: Vec<IpNet>,
}

impl IdentityExtractor {
    pub fn new(header: HeaderName, trusted: Vec<IpNet>) -> Self {
        Self { header, trusted }
    }

    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        let header = HeaderName::from_bytes(config.header.as_bytes()).map_err(|_| {
            ValidationError::InvalidHeader {
                name: config.header.clone(),
            }
        })?;

        let trusted = config
            .trusted_proxies
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map_err(|_| ValidationError::InvalidCidr { cidr: cidr.clone() })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self::new(header, trusted))
    }

    /// Take the identity header out of `headers` and return the principal it
    /// names, if the peer is allowed to assert one.
    ///
    /// The header is removed either way so it never reaches the upstream.
    pub fn extract(&self, headers: &mut HeaderMap, peer: IpAddr) -> Option<Principal> {
        let value = headers.remove(&self.header)?;

        let peer = peer.to_canonical();
        if !self.trusted.iter().any(|net| net.contains(&peer)) {
            debug!(%peer, "Ignoring identity header from untrusted peer");
            return None;
        }

        match value.to_str().map(str::trim) {
            Ok(name) if !name.is_empty() => Some(Principal::new(name)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn extractor() -> IdentityExtractor {
        IdentityExtractor::from_config(&IdentityConfig::default()).unwrap()
    }

    fn headers_with(user: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-remote-user", HeaderValue::from_static(user));
        headers
    }

    #[test]
    fn test_trusted_peer() {
        let mut headers = headers_with("alice@example.com");
        let principal = extractor().extract(&mut headers, "127.0.0.1".parse().unwrap());
        assert_eq!(principal, Some(Principal::new("alice@example.com")));
        assert!(headers.get("x-remote-user").is_none());
    }

    #[test]
    fn test_untrusted_peer_is_unauthenticated() {
        let mut headers = headers_with("alice@example.com");
        let principal = extractor().extract(&mut headers, "192.0.2.10".parse().unwrap());
        assert_eq!(principal, None);
        assert!(headers.get("x-remote-user").is_none());
    }

    #[test]
    fn test_ipv4_mapped_peer() {
        let mut headers = headers_with("alice@example.com");
        let principal = extractor().extract(&mut headers, "::ffff:127.0.0.1".parse().unwrap());
        assert!(principal.is_some());
    }

    #[test]
    fn test_missing_or_blank_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(extractor().extract(&mut headers, "127.0.0.1".parse().unwrap()), None);

        let mut headers = headers_with("  ");
        assert_eq!(extractor().extract(&mut headers, "127.0.0.1".parse().unwrap()), None);
    }
}
