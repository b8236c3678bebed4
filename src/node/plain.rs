//! Plain node: unordered parent/child links with cardinality checks.

use crate::engine::Relations;
use crate::error::RelationError;
use crate::store::{IdentifierStore, RelationStore, RelationTxn};
use crate::types::{NodeType, Pid, PidHandle, PidId, Relation, RelationKind, SiblingGroup};

use super::query::{PidQuery, Side};
use super::settle;

/// An identifier bound to a relation kind.
pub struct PidNode<R: RelationStore, I: IdentifierStore> {
    engine: Relations<R, I>,
    pid: Pid,
    kind: RelationKind,
}

impl<R: RelationStore, I: IdentifierStore> PidNode<R, I> {
    pub(crate) fn new(engine: Relations<R, I>, pid: Pid, kind: RelationKind) -> Self {
        Self { engine, pid, kind }
    }

    /// The identifier this node is bound to.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// The relation kind this node is bound to.
    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub(crate) fn engine(&self) -> &Relations<R, I> {
        &self.engine
    }

    /// Children of this node.
    pub fn children(&self) -> PidQuery<'_, R, I> {
        PidQuery::new(&self.engine, self.pid.id, &self.kind, Side::Children)
    }

    /// Parents of this node.
    pub fn parents(&self) -> PidQuery<'_, R, I> {
        PidQuery::new(&self.engine, self.pid.id, &self.kind, Side::Parents)
    }

    /// Whether this node has at least one child.
    pub async fn is_parent(&self) -> Result<bool, RelationError> {
        Ok(self
            .engine
            .relation_store()
            .has_children(self.pid.id, &self.kind.name)
            .await?)
    }

    /// Whether this node has at least one parent.
    pub async fn is_child(&self) -> Result<bool, RelationError> {
        Ok(self
            .engine
            .relation_store()
            .has_parents(self.pid.id, &self.kind.name)
            .await?)
    }

    /// Link `child` under this node.
    ///
    /// Fails with [`RelationError::Conflict`] if the edge exists and with
    /// [`RelationError::CardinalityExceeded`] if a bound of the kind would
    /// be exceeded. Versioned kinds are rejected with
    /// [`RelationError::VersioningState`].
    pub async fn insert_child(&self, child: impl Into<PidHandle>) -> Result<Relation, RelationError> {
        self.check_writable()?;
        let child = self.engine.resolve(child).await?;
        let mut txn = self.begin().await?;
        let outcome = self.create_in(&mut txn, child.id, None).await;
        let relation = settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid.id,
            child = %child.id,
            kind = %self.kind.name,
            "Relation created"
        );
        Ok(relation)
    }

    /// Unlink `child` from this node.
    pub async fn remove_child(&self, child: impl Into<PidHandle>) -> Result<(), RelationError> {
        self.check_writable()?;
        let child = self.engine.resolve(child).await?;
        let mut txn = self.begin().await?;
        let outcome = txn.delete(child.id).await.map_err(RelationError::from);
        settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid.id,
            child = %child.id,
            kind = %self.kind.name,
            "Relation removed"
        );
        Ok(())
    }

    /// Versioning groups only change through
    /// [`VersioningNode`](super::VersioningNode).
    pub(crate) fn check_writable(&self) -> Result<(), RelationError> {
        if self.kind.node == NodeType::Versioning {
            return Err(RelationError::VersioningState(format!(
                "kind {} is versioned; modify it through its versioning node",
                self.kind.name
            )));
        }
        Ok(())
    }

    /// Open a transaction on this node's sibling group.
    pub(crate) async fn begin(&self) -> Result<R::Txn, RelationError> {
        let group = SiblingGroup::new(self.pid.id, self.kind.name.clone());
        Ok(self.engine.relation_store().begin(&group).await?)
    }

    /// Create the edge to `child` and enforce the kind's bounds.
    ///
    /// The edge is created before the counts are checked so that a
    /// duplicate surfaces as a conflict rather than a bound violation.
    /// Counts include the new edge.
    pub(crate) async fn create_in(
        &self,
        txn: &mut R::Txn,
        child: PidId,
        position: Option<u32>,
    ) -> Result<Relation, RelationError> {
        if self.kind.max_parents.is_some() {
            txn.lock_child(child).await?;
        }
        let relation = txn.create(child, position).await?;

        if let Some(max) = self.kind.max_children {
            let count = txn.child_count().await?;
            if count > max {
                return Err(RelationError::CardinalityExceeded {
                    kind: self.kind.name.clone(),
                    pid: self.pid.id,
                    side: "children",
                    current: count - 1,
                    max,
                });
            }
        }
        if let Some(max) = self.kind.max_parents {
            let count = txn.parent_count(child).await?;
            if count > max {
                return Err(RelationError::CardinalityExceeded {
                    kind: self.kind.name.clone(),
                    pid: child,
                    side: "parents",
                    current: count - 1,
                    max,
                });
            }
        }
        Ok(relation)
    }
}
