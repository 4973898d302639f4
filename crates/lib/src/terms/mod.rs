//! Replica term mapping for a single shard.
//!
//! [`Terms`] is an immutable-by-convention value: every mutation helper takes
//! `&self` and returns `Some(new_terms)` when a write is needed or `None` when
//! the requested change is already satisfied. The update loops in
//! [`crate::shard`] recompute these against the freshest state on every
//! attempt, so the helpers themselves carry no concurrency concerns.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::shard::ShardTermsError;

pub mod codec;

/// Mapping from replica identifier to its term.
///
/// Ordering of replicas is not meaningful; a sorted map is used so the
/// encoded form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Terms {
    values: BTreeMap<String, u64>,
}

impl Terms {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// The term of `replica`, if registered.
    pub fn get(&self, replica: &str) -> Option<u64> {
        self.values.get(replica).copied()
    }

    /// Whether `replica` is registered.
    pub fn contains(&self, replica: &str) -> bool {
        self.values.contains_key(replica)
    }

    /// Number of registered replicas.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no replica is registered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(replica, term)` pairs in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Registered replica identifiers.
    pub fn replicas(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// The highest term held by any replica.
    pub fn max_term(&self) -> Option<u64> {
        self.values.values().copied().max()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, u64> {
        &self.values
    }

    /// Whether `replica` is registered and holds the highest term.
    pub fn have_highest_term(&self, replica: &str) -> bool {
        match (self.get(replica), self.max_term()) {
            (Some(term), Some(max)) => term == max,
            _ => false,
        }
    }

    /// Whether `replica` may become leader.
    ///
    /// An empty mapping means no replica has ever written, so anyone may lead.
    /// Otherwise the replica must be registered with the highest term.
    pub fn can_become_leader(&self, replica: &str) -> bool {
        self.is_empty() || self.have_highest_term(replica)
    }

    /// Whether a leader should stop forwarding updates to `replica`.
    ///
    /// True only for a registered replica that lags the highest term.
    pub fn skip_sending_updates_to(&self, replica: &str) -> bool {
        self.contains(replica) && !self.have_highest_term(replica)
    }

    fn with(&self, replica: &str, term: u64) -> Terms {
        let mut values = self.values.clone();
        values.insert(replica.to_string(), term);
        Terms { values }
    }

    /// Adds `replica` with term 0 unless already present.
    pub fn register(&self, replica: &str) -> Option<Terms> {
        if self.contains(replica) {
            None
        } else {
            Some(self.with(replica, 0))
        }
    }

    /// Raises `replica` strictly above every replica outside `excluded`.
    ///
    /// The floor is the highest term among registered replicas other than
    /// `replica` that are not in `excluded`. When no such replica exists the
    /// replica simply advances by one. A write is produced only when the new
    /// term is strictly greater than the current one.
    ///
    /// Fails with [`ShardTermsError::TermOverflow`] when the new term would
    /// not fit in a `u64`.
    pub fn increase_term(&self, replica: &str, excluded: &HashSet<String>) -> Result<Option<Terms>> {
        let current = self.get(replica);
        let floor = self
            .iter()
            .filter(|(r, _)| *r != replica && !excluded.contains(*r))
            .map(|(_, term)| term)
            .max();

        let Some(target) = floor.or(current).map_or(Some(1), |term| term.checked_add(1)) else {
            return Err(ShardTermsError::TermOverflow {
                replica: replica.to_string(),
            }
            .into());
        };

        Ok(match current {
            Some(term) if term >= target => None,
            _ => Some(self.with(replica, target)),
        })
    }

    /// Raises `replica` to the highest term currently held.
    ///
    /// An unregistered replica is added at the highest term. Never lowers a
    /// term, and produces nothing for an empty mapping.
    pub fn set_equals_to_max(&self, replica: &str) -> Option<Terms> {
        let max = self.max_term()?;
        match self.get(replica) {
            Some(term) if term >= max => None,
            _ => Some(self.with(replica, max)),
        }
    }

    /// Drops `replica` from the mapping if present.
    pub fn remove(&self, replica: &str) -> Option<Terms> {
        if !self.contains(replica) {
            return None;
        }
        let mut values = self.values.clone();
        values.remove(replica);
        Some(Terms { values })
    }
}

impl From<BTreeMap<String, u64>> for Terms {
    fn from(values: BTreeMap<String, u64>) -> Self {
        Self { values }
    }
}

impl From<Terms> for BTreeMap<String, u64> {
    fn from(terms: Terms) -> Self {
        terms.values
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for Terms {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Returns why `name` is unusable as a replica, collection, or shard
/// identifier, or `None` if it is fine.
pub(crate) fn invalid_identifier(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        Some("must not be empty")
    } else if name.contains('/') {
        Some("must not contain '/'")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("must not contain whitespace or control characters")
    } else {
        None
    }
}
