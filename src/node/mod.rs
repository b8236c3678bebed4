//! Node views over the relation graph.
//!
//! A node is an identifier bound to a relation kind. Three variants exist:
//!
//! ```text
//! PidNode          plain parent/child links
//!    └─ OrderedNode     + dense sibling positions
//!          └─ VersioningNode  + draft slot, parent redirect
//! ```
//!
//! Each layer wraps the one below it. [`Node`] is the closed set of
//! variants used when the caller does not care which one a kind maps to.

pub mod plain;
pub mod query;
pub mod ordered;
pub mod versioning;

pub use plain::PidNode;
pub use query::{PidQuery, Side};
pub use ordered::OrderedNode;
pub use versioning::VersioningNode;

use crate::error::RelationError;
use crate::store::{IdentifierStore, RelationStore, RelationTxn};
use crate::types::{InsertAt, NodeType, Pid, PidHandle, Relation, RelationKind};

/// Any node variant, dispatched by the kind's configuration.
pub enum Node<R: RelationStore, I: IdentifierStore> {
    /// Unordered kind.
    Unordered(PidNode<R, I>),
    /// Ordered kind.
    Ordered(OrderedNode<R, I>),
    /// Versioning kind.
    Versioning(VersioningNode<R, I>),
}

impl<R: RelationStore, I: IdentifierStore> Node<R, I> {
    fn base(&self) -> &PidNode<R, I> {
        match self {
            Self::Unordered(node) => node,
            Self::Ordered(node) => node.base(),
            Self::Versioning(node) => node.ordered().base(),
        }
    }

    /// The identifier this node is bound to.
    pub fn pid(&self) -> &Pid {
        self.base().pid()
    }

    /// The relation kind this node is bound to.
    pub fn kind(&self) -> &RelationKind {
        self.base().kind()
    }

    /// Which variant this is.
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Unordered(_) => NodeType::Unordered,
            Self::Ordered(_) => NodeType::Ordered,
            Self::Versioning(_) => NodeType::Versioning,
        }
    }

    /// Children query. Versioning nodes only yield published versions.
    pub fn children(&self) -> PidQuery<'_, R, I> {
        match self {
            Self::Versioning(node) => node.children(),
            _ => self.base().children(),
        }
    }

    /// Parents query.
    pub fn parents(&self) -> PidQuery<'_, R, I> {
        self.base().parents()
    }

    /// Whether this node has children.
    pub async fn is_parent(&self) -> Result<bool, RelationError> {
        self.base().is_parent().await
    }

    /// Whether this node has parents.
    pub async fn is_child(&self) -> Result<bool, RelationError> {
        self.base().is_child().await
    }

    /// Insert a child.
    ///
    /// `at` is ignored by unordered nodes except that explicit indexes are
    /// rejected. Versioning nodes insert a version (not a draft).
    pub async fn insert_child(&self, child: impl Into<PidHandle>, at: InsertAt) -> Result<Relation, RelationError> {
        match self {
            Self::Unordered(node) => match at {
                InsertAt::Index(_) => Err(RelationError::UnorderedKind(node.kind().name.clone())),
                InsertAt::Last | InsertAt::Unpositioned => node.insert_child(child).await,
            },
            Self::Ordered(node) => node.insert_child(child, at).await,
            Self::Versioning(node) => node.insert_version_child(child, at).await,
        }
    }

    /// Remove a child. Ordered nodes reindex the remaining siblings.
    pub async fn remove_child(&self, child: impl Into<PidHandle>) -> Result<(), RelationError> {
        match self {
            Self::Unordered(node) => node.remove_child(child).await,
            Self::Ordered(node) => node.remove_child(child, true).await,
            Self::Versioning(node) => node.remove_version_child(child).await,
        }
    }

    /// The ordered layer, if this kind is ordered.
    pub fn as_ordered(&self) -> Option<&OrderedNode<R, I>> {
        match self {
            Self::Unordered(_) => None,
            Self::Ordered(node) => Some(node),
            Self::Versioning(node) => Some(node.ordered()),
        }
    }

    /// The versioning layer, if this is the versioning kind.
    pub fn as_versioning(&self) -> Option<&VersioningNode<R, I>> {
        match self {
            Self::Versioning(node) => Some(node),
            _ => None,
        }
    }
}

/// Commit on success, roll back on failure.
///
/// A rollback failure is logged; the original error is what the caller sees.
pub(crate) async fn settle<T, X: RelationTxn>(txn: X, outcome: Result<T, RelationError>) -> Result<T, RelationError> {
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let group = txn.group().clone();
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(
                    parent = %group.parent,
                    kind = %group.kind,
                    error = %rollback_err,
                    "Rollback failed"
                );
            }
            tracing::debug!(
                parent = %group.parent,
                kind = %group.kind,
                error = %err,
                "Relation transaction rolled back"
            );
            Err(err)
        }
    }
}

/// Sibling index as a stored position.
pub(crate) fn to_position(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}
