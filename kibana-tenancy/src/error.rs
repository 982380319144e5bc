//! Error types for membership lookups

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MembershipError>;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Membership backend unavailable: {0}")]
    Unavailable(String),

    #[error("Membership lookup failed for {principal}: {reason}")]
    Lookup { principal: String, reason: String },
}
