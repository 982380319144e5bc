//! Index-level access decisions

use crate::membership::MembershipSet;
use crate::principal::{IndexName, Principal};

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        self == Verdict::Allow
    }
}

/// Decides whether a principal may see an index.
///
/// The default index is visible to everyone. The bypass principal sees
/// everything and is exempt from filtering altogether.
#[derive(Debug, Clone)]
pub struct Authorizer {
    default_index: IndexName,
    bypass_principal: Principal,
}

impl Authorizer {
    pub fn new(default_index: IndexName, bypass_principal: Principal) -> Self {
        Self {
            default_index,
            bypass_principal,
        }
    }

    /// Check if requests from this principal skip classification and filtering
    pub fn is_bypass(&self, principal: &Principal) -> bool {
        *principal == self.bypass_principal
    }

    /// Decide whether `principal` may access `index`
    pub fn authorize(
        &self,
        principal: &Principal,
        index: &str,
        membership: &MembershipSet,
    ) -> Verdict {
        if self.is_bypass(principal) || self.is_shared(index) || membership.contains(index) {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }

    /// Decide whether one hit of an index pattern listing stays visible.
    ///
    /// An index the request explicitly named is kept even without membership,
    /// so a caller can inspect the pattern they asked for.
    pub fn hit_visible(
        &self,
        id: &str,
        membership: &MembershipSet,
        requested: Option<&IndexName>,
    ) -> bool {
        self.is_shared(id)
            || membership.contains(id)
            || requested.is_some_and(|index| index.as_str() == id)
    }

    fn is_shared(&self, index: &str) -> bool {
        self.default_index.as_str() == index
    }
}
