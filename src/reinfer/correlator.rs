use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PostprocessError, Result};

/// Originating frame time in whole microseconds.
///
/// This is the same value an outbound [`super::ReinferRequest`] carries, so
/// a continuation frame maps back to its group by exact integer equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(pub i64);

impl CorrelationKey {
    pub fn from_seconds(time: f64) -> Self {
        Self((time * 1_000_000.0).round() as i64)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a submitted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Stored; more parts are still outstanding.
    Pending { arrived: usize, expected: usize },
    /// Stored; the group now holds every expected part.
    Complete,
    /// No group for this key (never opened, swept, or already popped).
    Unknown,
}

#[derive(Debug)]
struct PendingGroup<C, F> {
    expected: usize,
    context: C,
    parts: Vec<F>,
}

/// A fully assembled group handed back by [`ReinferCorrelator::pop`].
#[derive(Debug)]
pub struct CompletedGroup<C, F> {
    pub key: CorrelationKey,
    pub context: C,
    pub parts: Vec<F>,
}

/// Reassembles asynchronously returned re-inference fragments.
///
/// Each group is keyed by the time of the frame that commissioned the
/// secondary passes, holds that frame's carried context, and collects
/// fragments in arrival order until `expected` have arrived.
#[derive(Debug)]
pub struct ReinferCorrelator<C, F> {
    groups: BTreeMap<CorrelationKey, PendingGroup<C, F>>,
    timeout: f64,
}

impl<C, F> ReinferCorrelator<C, F> {
    /// `timeout` is in seconds.
    pub fn new(timeout: f64) -> Self {
        Self {
            groups: BTreeMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Register a group awaiting `expected` fragments.
    pub fn open(&mut self, key: CorrelationKey, expected: usize, context: C) -> Result<()> {
        if expected == 0 {
            return Err(PostprocessError::EmptyCorrelation { key: key.0 });
        }
        if self.groups.contains_key(&key) {
            return Err(PostprocessError::DuplicateCorrelation { key: key.0 });
        }
        self.groups.insert(
            key,
            PendingGroup {
                expected,
                context,
                parts: Vec::with_capacity(expected),
            },
        );
        Ok(())
    }

    /// Append a fragment to the group for `key`.
    ///
    /// Fragments beyond the expected count are dropped.
    pub fn submit_part(&mut self, key: CorrelationKey, fragment: F) -> Submission {
        let Some(group) = self.groups.get_mut(&key) else {
            return Submission::Unknown;
        };
        if group.parts.len() < group.expected {
            group.parts.push(fragment);
        } else {
            tracing::warn!(key = key.0, "surplus re-inference fragment dropped");
        }
        if group.parts.len() == group.expected {
            Submission::Complete
        } else {
            Submission::Pending {
                arrived: group.parts.len(),
                expected: group.expected,
            }
        }
    }

    pub fn is_complete(&self, key: CorrelationKey) -> bool {
        self.groups
            .get(&key)
            .is_some_and(|g| g.parts.len() == g.expected)
    }

    /// Remove and return the group for `key` if it is complete.
    ///
    /// Incomplete groups stay registered and `None` is returned.
    pub fn pop(&mut self, key: CorrelationKey) -> Option<CompletedGroup<C, F>> {
        if !self.is_complete(key) {
            return None;
        }
        self.groups.remove(&key).map(|g| CompletedGroup {
            key,
            context: g.context,
            parts: g.parts,
        })
    }

    /// Drop every group whose key is older than `now - timeout`.
    ///
    /// Returns the evicted keys, oldest first. Dropped groups are never
    /// retried; their frames simply produce no alert.
    pub fn sweep(&mut self, now: f64) -> Vec<CorrelationKey> {
        let cutoff = CorrelationKey::from_seconds(now - self.timeout);
        let retained = self.groups.split_off(&cutoff);
        let expired = std::mem::replace(&mut self.groups, retained);

        expired
            .into_iter()
            .map(|(key, group)| {
                tracing::warn!(
                    key = key.0,
                    arrived = group.parts.len(),
                    expected = group.expected,
                    timeout = self.timeout,
                    "re-inference result expired"
                );
                key
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.groups.contains_key(&key)
    }
}
