//! Tenant isolation rules for a shared Kibana/Elasticsearch backend
//!
//! Decides which filter policy a proxied request falls under, which index it
//! targets, and whether the caller's project memberships allow it.

pub mod authorize;
pub mod classify;
pub mod error;
pub mod membership;
pub mod principal;

pub use authorize::{Authorizer, Verdict};
pub use classify::{classify, Classification, FilterPolicy, Rejection};
pub use error::{MembershipError, Result};
pub use membership::{MembershipSet, MembershipSource, StaticMembership};
pub use principal::{IndexName, Principal};
