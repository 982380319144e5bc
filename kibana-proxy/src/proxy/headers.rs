//! Header copying rules shared by both proxy directions

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashSet;
use std::net::IpAddr;

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Check if a header only applies to a single connection and must not be forwarded
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers listed in `Connection`, which are hop-by-hop for this message only
fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Copy end-to-end headers from `src` into a new map
pub fn end_to_end(src: &HeaderMap) -> HeaderMap {
    let tokens = connection_tokens(src);
    let mut dst = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if is_hop_by_hop(name) || tokens.contains(name.as_str()) {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
    dst
}

/// Record the client address and scheme the request arrived with
pub fn append_forwarded(headers: &mut HeaderMap, client: Option<IpAddr>) {
    if let Some(addr) = client {
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{}, {}", existing, addr),
            _ => addr.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }
    headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
        assert!(is_hop_by_hop(&header::PROXY_AUTHORIZATION));

        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
        assert!(!is_hop_by_hop(&header::CONTENT_LENGTH));
        assert!(!is_hop_by_hop(&header::AUTHORIZATION));
    }

    #[test]
    fn test_end_to_end_drops_connection_tokens() {
        let mut src = HeaderMap::new();
        src.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Trace"));
        src.insert("x-trace", HeaderValue::from_static("1"));
        src.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        src.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        src.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let dst = end_to_end(&src);
        assert!(dst.get(header::CONNECTION).is_none());
        assert!(dst.get("x-trace").is_none());
        assert_eq!(dst.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(dst.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded(&mut headers, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");

        append_forwarded(&mut headers, Some("10.0.0.2".parse().unwrap()));
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 10.0.0.2");
    }
}
