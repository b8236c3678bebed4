//! The relation (edge) between two identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::pid::PidId;

/// Key of a sibling group: every child of `parent` under `kind`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiblingGroup {
    /// Parent identifier.
    pub parent: PidId,
    /// Relation kind name.
    pub kind: String,
}

impl SiblingGroup {
    /// Create a group key.
    pub fn new(parent: PidId, kind: impl Into<String>) -> Self {
        Self {
            parent,
            kind: kind.into(),
        }
    }
}

/// Directed, typed edge from a parent identifier to a child identifier.
///
/// Identity is `(parent, child, kind)`. Implements `Ord` by position first
/// (unpositioned edges last), then parent, kind and child, so a sorted
/// sibling list is the ordered sibling list. `created_at` does not take part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Parent identifier (source).
    pub parent: PidId,
    /// Child identifier (target).
    pub child: PidId,
    /// Relation kind name.
    pub kind: String,
    /// Position among siblings, for ordered kinds.
    pub position: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Create a new edge stamped with the current time.
    pub fn new(parent: PidId, child: PidId, kind: impl Into<String>, position: Option<u32>) -> Self {
        Self {
            parent,
            child,
            kind: kind.into(),
            position,
            created_at: Utc::now(),
        }
    }
}

impl PartialOrd for Relation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relation {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_position = match (self.position, other.position) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_position
            .then_with(|| self.parent.cmp(&other.parent))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.child.cmp(&other.child))
    }
}
