//! Request classification: which filter policy applies and which index is targeted

use crate::principal::IndexName;
use serde_json::Value;
use std::fmt;

const INDEX_PATTERN_SEARCH: &str = "elasticsearch/.kibana/index-pattern/_search";
const INDEX_PATTERN: &str = "elasticsearch/.kibana/index-pattern";
const MULTI_SEARCH: &str = "elasticsearch/_msearch";
const ELASTICSEARCH: &str = "elasticsearch/";
const FIELD_MAPPING: &str = "_mapping/field";

/// Route segment the index of a field mapping request follows, as in
/// `/elasticsearch/<index>/_mapping/field/*`
const ROUTE_SEGMENT: &str = "elasticsearch";

/// How a request is authorized and how its response is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPolicy {
    /// Forwarded untouched
    None,
    /// Listing of index patterns; the response hits are filtered per caller
    IndexPatternSearch,
    /// Fetch of a single index pattern named by the last path segment
    IndexPatternLookup,
    /// Multi-search whose first header names the index
    MultiSearch,
    /// Field mapping of the index named in the path
    FieldMapping,
}

impl FilterPolicy {
    /// Select the policy from the request path alone.
    ///
    /// Rules are checked in precedence order; the first match wins.
    pub fn from_path(path: &str) -> Self {
        if path.contains(INDEX_PATTERN_SEARCH) {
            FilterPolicy::IndexPatternSearch
        } else if path.contains(INDEX_PATTERN) {
            FilterPolicy::IndexPatternLookup
        } else if path.contains(MULTI_SEARCH) {
            FilterPolicy::MultiSearch
        } else if path.contains(ELASTICSEARCH) && path.contains(FIELD_MAPPING) {
            FilterPolicy::FieldMapping
        } else {
            FilterPolicy::None
        }
    }

    /// Whether the request body must be buffered to find the target index
    pub fn inspects_request_body(self) -> bool {
        matches!(self, FilterPolicy::MultiSearch)
    }

    /// Whether access is checked before anything is sent upstream
    pub fn authorizes_before_forward(self) -> bool {
        matches!(
            self,
            FilterPolicy::IndexPatternLookup | FilterPolicy::MultiSearch | FilterPolicy::FieldMapping
        )
    }

    /// Whether the upstream response body is rewritten
    pub fn filters_response(self) -> bool {
        matches!(self, FilterPolicy::IndexPatternSearch)
    }
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterPolicy::None => "none",
            FilterPolicy::IndexPatternSearch => "index-pattern-search",
            FilterPolicy::IndexPatternLookup => "index-pattern-lookup",
            FilterPolicy::MultiSearch => "multi-search",
            FilterPolicy::FieldMapping => "field-mapping",
        };
        f.write_str(name)
    }
}

/// Result of classifying a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub policy: FilterPolicy,
    /// Index the request explicitly targets, if the policy names one
    pub index: Option<IndexName>,
}

impl Classification {
    /// Extract the target index for an already selected policy
    pub fn extract(policy: FilterPolicy, path: &str, body: &[u8]) -> Result<Self, Rejection> {
        let index = match policy {
            FilterPolicy::None | FilterPolicy::IndexPatternSearch => None,
            FilterPolicy::IndexPatternLookup => Some(last_segment(path)?),
            FilterPolicy::MultiSearch => Some(multi_search_index(body)?),
            FilterPolicy::FieldMapping => Some(field_mapping_index(path)?),
        };

        Ok(Self { policy, index })
    }
}

/// Classify a request from its path and (possibly empty) body.
///
/// Failing to find a required index is a [`Rejection::Malformed`], never a
/// silent pass-through.
pub fn classify(path: &str, body: &[u8]) -> Result<Classification, Rejection> {
    Classification::extract(FilterPolicy::from_path(path), path, body)
}

/// Locally decided outcome that ends a request without contacting upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No principal was attached to the request
    Unauthenticated,
    /// The principal may not access the index
    Denied { index: IndexName },
    /// The target index could not be determined
    Malformed { reason: String },
}

impl Rejection {
    fn malformed(reason: impl Into<String>) -> Self {
        Rejection::Malformed {
            reason: reason.into(),
        }
    }

    /// HTTP status code reported to the client
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::Unauthenticated | Rejection::Denied { .. } => 403,
            Rejection::Malformed { .. } => 400,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unauthenticated => write!(f, "User is not logged in"),
            Rejection::Denied { index } => {
                write!(f, "User is not authorized to access index {}", index)
            }
            Rejection::Malformed { reason } => write!(f, "Malformed request: {}", reason),
        }
    }
}

fn last_segment(path: &str) -> Result<IndexName, Rejection> {
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => Ok(IndexName::new(segment)),
        _ => Err(Rejection::malformed("index pattern path has no index segment")),
    }
}

/// Take the segment right after the first `elasticsearch` segment.
///
/// Segments starting with `_` are API endpoints, never index names, so a path
/// like `/elasticsearch/_mapping/field/*` names no index.
fn field_mapping_index(path: &str) -> Result<IndexName, Rejection> {
    let mut segments = path.split('/').skip_while(|segment| *segment != ROUTE_SEGMENT);
    segments.next();

    match segments.next() {
        Some(segment) if !segment.is_empty() && !segment.starts_with('_') => {
            Ok(IndexName::new(segment))
        }
        _ => Err(Rejection::malformed(
            "field mapping path does not name an index",
        )),
    }
}

/// Read the `index` of the first search header.
///
/// The body is a stream of JSON values (newline-delimited or not); only the
/// first one is parsed.
fn multi_search_index(body: &[u8]) -> Result<IndexName, Rejection> {
    let header = serde_json::Deserializer::from_slice(body)
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| Rejection::malformed("multi-search body is empty"))?
        .map_err(|e| Rejection::malformed(format!("multi-search header is not JSON: {}", e)))?;

    let index = match header.get("index") {
        Some(Value::Array(indices)) => indices.first().and_then(Value::as_str),
        Some(Value::String(index)) => Some(index.as_str()),
        _ => None,
    };

    match index {
        Some(index) if !index.is_empty() => Ok(IndexName::new(index)),
        _ => Err(Rejection::malformed(
            "multi-search header has no usable index field",
        )),
    }
}
