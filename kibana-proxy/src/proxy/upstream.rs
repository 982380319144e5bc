//! Mapping between inbound proxy URIs and the fixed upstream

use crate::error::{ProxyError, Result};
use http::{HeaderValue, Uri};
use url::Url;

/// The backend all requests are forwarded to, and the path prefix the proxy
/// itself is mounted under
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Upstream URL without a trailing slash, e.g. `http://kibana:5601/base`
    base: String,
    authority: HeaderValue,
    /// Mount path without a trailing slash; empty when mounted at the root
    mount_path: String,
}

impl UpstreamTarget {
    pub fn new(upstream_url: &str, mount_path: &str) -> Result<Self> {
        let url = Url::parse(upstream_url)
            .map_err(|e| ProxyError::InvalidUri(format!("{}: {}", upstream_url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::InvalidUri(format!("{}: missing host", upstream_url)))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let authority = HeaderValue::from_str(&authority)
            .map_err(|e| ProxyError::InvalidUri(format!("{}: {}", authority, e)))?;

        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
            authority,
            mount_path: mount_path.trim_end_matches('/').to_string(),
        })
    }

    /// Value for the `Host` header of upstream requests
    pub fn host_header(&self) -> &HeaderValue {
        &self.authority
    }

    /// Build the upstream URI: upstream base + path below the mount point + query
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri> {
        let path = self.route_path(inbound.path());
        let target = match inbound.query() {
            Some(query) => format!("{}{}?{}", self.base, path, query),
            None => format!("{}{}", self.base, path),
        };

        target
            .parse()
            .map_err(|e| ProxyError::InvalidUri(format!("{}: {}", target, e)))
    }

    /// Rewrite a `Location` pointing into the upstream so it points at the proxy.
    ///
    /// Returns `None` when the location refers somewhere else.
    pub fn rewrite_location(&self, location: &str) -> Option<String> {
        let rest = location.strip_prefix(&self.base)?;
        if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
            return None;
        }

        if self.mount_path.is_empty() && !rest.starts_with('/') {
            Some(format!("/{}", rest))
        } else {
            Some(format!("{}{}", self.mount_path, rest))
        }
    }

    /// The inbound path as the upstream will see it, with the mount path removed
    pub fn route_path<'a>(&self, path: &'a str) -> &'a str {
        if self.mount_path.is_empty() {
            return path;
        }
        match path.strip_prefix(self.mount_path.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> UpstreamTarget {
        UpstreamTarget::new("http://kibana.internal:5601", "/hopsworks-api/kibana").unwrap()
    }

    #[test]
    fn test_target_uri_strips_mount_path() {
        let uri: Uri = "/hopsworks-api/kibana/elasticsearch/_msearch?timeout=0"
            .parse()
            .unwrap();
        assert_eq!(
            target().target_uri(&uri).unwrap().to_string(),
            "http://kibana.internal:5601/elasticsearch/_msearch?timeout=0"
        );
    }

    #[test]
    fn test_target_uri_outside_mount_path() {
        let uri: Uri = "/hopsworks-api/kibanax/app".parse().unwrap();
        assert_eq!(
            target().target_uri(&uri).unwrap().to_string(),
            "http://kibana.internal:5601/hopsworks-api/kibanax/app"
        );
    }

    #[test]
    fn test_target_uri_keeps_upstream_base_path() {
        let target = UpstreamTarget::new("http://es:9200/kibana/", "/").unwrap();
        let uri: Uri = "/app/kibana".parse().unwrap();
        assert_eq!(
            target.target_uri(&uri).unwrap().to_string(),
            "http://es:9200/kibana/app/kibana"
        );
    }

    #[test]
    fn test_route_path() {
        let t = target();
        assert_eq!(t.route_path("/hopsworks-api/kibana/elasticsearch/_msearch"), "/elasticsearch/_msearch");
        assert_eq!(t.route_path("/hopsworks-api/kibana"), "");
        assert_eq!(t.route_path("/other/elasticsearch"), "/other/elasticsearch");

        let root = UpstreamTarget::new("http://kibana.internal:5601", "/").unwrap();
        assert_eq!(root.route_path("/elasticsearch/_msearch"), "/elasticsearch/_msearch");
    }

    #[test]
    fn test_host_header() {
        assert_eq!(target().host_header(), "kibana.internal:5601");
        let target = UpstreamTarget::new("http://kibana.internal", "/").unwrap();
        assert_eq!(target.host_header(), "kibana.internal");
    }

    #[test]
    fn test_rewrite_location() {
        let t = target();
        assert_eq!(
            t.rewrite_location("http://kibana.internal:5601/app/kibana#/discover"),
            Some("/hopsworks-api/kibana/app/kibana#/discover".to_string())
        );
        assert_eq!(
            t.rewrite_location("http://kibana.internal:5601"),
            Some("/hopsworks-api/kibana".to_string())
        );
        assert_eq!(t.rewrite_location("http://elsewhere/app"), None);
        assert_eq!(t.rewrite_location("http://kibana.internal:56010/app"), None);
        assert_eq!(t.rewrite_location("/app/kibana"), None);
    }
}
