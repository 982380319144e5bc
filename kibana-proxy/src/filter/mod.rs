//! Policy-specific rewriting of upstream responses

pub mod hits;

pub use hits::retain_hits;

use crate::codec::ContentCoding;
use crate::error::FilterError;
use bytes::Bytes;
use http::HeaderMap;
use kibana_tenancy::{Authorizer, FilterPolicy, IndexName, MembershipSet};
use serde_json::Value;
use tracing::debug;

/// A response body after filtering, ready to be written to the client
#[derive(Debug, Clone)]
pub struct FilteredBody {
    pub body: Bytes,
    pub coding: ContentCoding,
}

/// Rewrites upstream responses so callers only see indices they may access
#[derive(Debug, Clone)]
pub struct ResponseFilter {
    authorizer: Authorizer,
    /// Largest decoded body the filter will parse
    max_decoded_bytes: usize,
}

impl ResponseFilter {
    pub fn new(authorizer: Authorizer, max_decoded_bytes: usize) -> Self {
        Self {
            authorizer,
            max_decoded_bytes,
        }
    }

    /// Apply the rewrite for `policy` to a fully buffered response body.
    ///
    /// Policies gated before forwarding return the body untouched. For index
    /// pattern listings the body is decoded, every hit the caller may not see
    /// is removed, and the result is re-encoded with the same coding.
    pub fn rewrite(
        &self,
        policy: FilterPolicy,
        requested: Option<&IndexName>,
        membership: &MembershipSet,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<FilteredBody, FilterError> {
        if !policy.filters_response() {
            let coding =
                ContentCoding::detect(headers, &body).unwrap_or(ContentCoding::Identity);
            return Ok(FilteredBody { body, coding });
        }

        let coding = ContentCoding::detect(headers, &body)?;
        if body.is_empty() {
            return Ok(FilteredBody { body, coding });
        }

        let decoded = coding.decode(&body, self.max_decoded_bytes)?;
        let mut doc: Value = serde_json::from_slice(&decoded)?;

        let removed = retain_hits(&mut doc, |id| {
            self.authorizer.hit_visible(id, membership, requested)
        })?;
        debug!(removed, "Filtered index pattern hits");

        let serialized = serde_json::to_vec(&doc)?;
        Ok(FilteredBody {
            body: coding.encode(&serialized)?,
            coding,
        })
    }
}
