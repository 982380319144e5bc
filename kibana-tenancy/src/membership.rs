//! Project membership lookup

use crate::error::Result;
use crate::principal::{IndexName, Principal};
use std::collections::{HashMap, HashSet};
use std::future::Future;

/// The indices one principal may access, as reported for the current request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet {
    indices: HashSet<IndexName>,
}

impl MembershipSet {
    pub fn new<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<IndexName>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether the given index belongs to one of the principal's projects
    pub fn contains(&self, index: &str) -> bool {
        self.indices.contains(index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl FromIterator<IndexName> for MembershipSet {
    fn from_iter<T: IntoIterator<Item = IndexName>>(iter: T) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}

/// Source of project membership for principals.
///
/// Called at most once per request; the result is authoritative for that
/// request and is never cached here.
pub trait MembershipSource: Send + Sync {
    /// Return every index the principal is a member of
    fn indices_for(
        &self,
        principal: &Principal,
    ) -> impl Future<Output = Result<MembershipSet>> + Send;
}

/// Membership table held in memory, typically loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    members: HashMap<Principal, Vec<IndexName>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a principal access to an index
    pub fn grant(&mut self, principal: Principal, index: IndexName) {
        self.members.entry(principal).or_default().push(index);
    }

    /// Builder-style variant of [`StaticMembership::grant`]
    pub fn with_member(mut self, principal: &str, indices: &[&str]) -> Self {
        for index in indices {
            self.grant(Principal::new(principal), IndexName::new(*index));
        }
        self
    }

    pub fn principals(&self) -> usize {
        self.members.len()
    }
}

impl FromIterator<(Principal, Vec<IndexName>)> for StaticMembership {
    fn from_iter<T: IntoIterator<Item = (Principal, Vec<IndexName>)>>(iter: T) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl MembershipSource for StaticMembership {
    async fn indices_for(&self, principal: &Principal) -> Result<MembershipSet> {
        let set: MembershipSet = self
            .members
            .get(principal)
            .map(|indices| indices.iter().cloned().collect())
            .unwrap_or_default();
        tracing::debug!(%principal, "Resolved membership");
        Ok(set)
    }
}
