//! Storage backends for relations and the identifier store interface.
//!
//! The relation store owns the edge table. Every mutation goes through a
//! [`RelationTxn`] bound to one sibling group: the transaction holds the
//! group lock until it is committed or dropped, so read-modify-write cycles
//! over positions never interleave.

pub mod memory;
pub mod identifiers;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::types::{Order, Pid, PidId, PidRef, Relation, SiblingGroup};

/// Error type for relation store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness violation on `(parent, child, kind)`.
    #[error("Relation already exists: {parent} -> {child} ({kind})")]
    Conflict {
        /// Parent identifier.
        parent: PidId,
        /// Child identifier.
        child: PidId,
        /// Relation kind.
        kind: String,
    },
    /// The edge does not exist.
    #[error("Relation not found: {parent} -> {child} ({kind})")]
    NotFound {
        /// Parent identifier.
        parent: PidId,
        /// Child identifier.
        child: PidId,
        /// Relation kind.
        kind: String,
    },
    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Direction for nearest-sibling lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Nearest strictly greater position.
    Next,
    /// Nearest strictly lesser position.
    Previous,
}

/// A transaction over a single sibling group.
///
/// Writes are invisible to other readers until [`commit`](RelationTxn::commit).
/// Dropping the transaction without committing rolls everything back.
#[async_trait]
pub trait RelationTxn: Send {
    /// The group this transaction is bound to.
    fn group(&self) -> &SiblingGroup;

    /// All edges of the group, including this transaction's writes,
    /// sorted by position with unpositioned edges last.
    async fn siblings(&mut self) -> Result<Vec<Relation>, StoreError>;

    /// Number of children in the group.
    async fn child_count(&mut self) -> Result<usize, StoreError>;

    /// Serialize against other transactions adding parents to `child`.
    ///
    /// Must be called before [`parent_count`](RelationTxn::parent_count)
    /// when the count guards a cardinality bound.
    async fn lock_child(&mut self, child: PidId) -> Result<(), StoreError>;

    /// Number of parents `child` has under the group's kind.
    async fn parent_count(&mut self, child: PidId) -> Result<usize, StoreError>;

    /// Create the edge `group.parent -> child`.
    ///
    /// Fails with [`StoreError::Conflict`] if it already exists.
    async fn create(&mut self, child: PidId, position: Option<u32>) -> Result<Relation, StoreError>;

    /// Delete the edge `group.parent -> child`.
    ///
    /// Fails with [`StoreError::NotFound`] if it does not exist.
    async fn delete(&mut self, child: PidId) -> Result<Relation, StoreError>;

    /// Update the position of an existing edge.
    async fn set_position(&mut self, child: PidId, position: Option<u32>) -> Result<(), StoreError>;

    /// Make all writes visible atomically.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard all writes.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Trait for relation storage backends.
///
/// Read methods are plain queries against committed state. Mutations are
/// performed through [`begin`](RelationStore::begin).
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Transaction type.
    type Txn: RelationTxn + 'static;

    /// Open a transaction on a sibling group, waiting for its lock.
    async fn begin(&self, group: &SiblingGroup) -> Result<Self::Txn, StoreError>;

    /// Fetch a single edge.
    async fn get(&self, parent: PidId, child: PidId, kind: &str) -> Result<Option<Relation>, StoreError>;

    /// Child edges of `parent`.
    ///
    /// With `order`, only positioned edges are returned, sorted by position.
    /// Without, every edge is returned, positioned ones first.
    async fn children(&self, parent: PidId, kind: &str, order: Option<Order>) -> Result<Vec<Relation>, StoreError>;

    /// Parent edges of `child`, ordered by parent id.
    async fn parents(&self, child: PidId, kind: &str) -> Result<Vec<Relation>, StoreError>;

    /// Whether `parent` has at least one child.
    async fn has_children(&self, parent: PidId, kind: &str) -> Result<bool, StoreError>;

    /// Whether `child` has at least one parent.
    async fn has_parents(&self, child: PidId, kind: &str) -> Result<bool, StoreError>;

    /// Sibling with the nearest strictly greater or lesser position.
    async fn neighbor(
        &self,
        parent: PidId,
        kind: &str,
        position: u32,
        direction: Direction,
    ) -> Result<Option<Relation>, StoreError>;

    /// Positioned sibling with the lowest (`Asc`) or highest (`Desc`) position.
    async fn boundary(&self, parent: PidId, kind: &str, order: Order) -> Result<Option<Relation>, StoreError>;

    /// Every edge where `pid` is the parent or the child, any kind.
    async fn relations_of(&self, pid: PidId) -> Result<Vec<Relation>, StoreError>;

    /// Create a single edge in its own transaction.
    async fn create(
        &self,
        parent: PidId,
        child: PidId,
        kind: &str,
        position: Option<u32>,
    ) -> Result<Relation, StoreError> {
        let mut txn = self.begin(&SiblingGroup::new(parent, kind)).await?;
        let relation = txn.create(child, position).await?;
        txn.commit().await?;
        Ok(relation)
    }

    /// Delete a single edge in its own transaction.
    async fn delete(&self, parent: PidId, child: PidId, kind: &str) -> Result<Relation, StoreError> {
        let mut txn = self.begin(&SiblingGroup::new(parent, kind)).await?;
        let relation = txn.delete(child).await?;
        txn.commit().await?;
        Ok(relation)
    }
}

/// Interface to the external identifier store.
///
/// The relation engine never creates or deletes identifiers. It reads them
/// and asks the store to redirect or register them.
#[async_trait]
pub trait IdentifierStore: Send + Sync {
    /// Error type for identifier operations.
    type Error: std::error::Error + Send + Sync;

    /// Look up an identifier by type and value.
    async fn resolve(&self, pid_ref: &PidRef) -> Result<Option<Pid>, Self::Error>;

    /// Look up an identifier by id.
    async fn get(&self, id: PidId) -> Result<Option<Pid>, Self::Error>;

    /// Look up several identifiers, preserving input order and skipping
    /// unknown ids.
    async fn get_many(&self, ids: &[PidId]) -> Result<Vec<Pid>, Self::Error>;

    /// Point `id` at `target`.
    async fn redirect(&self, id: PidId, target: PidId) -> Result<Pid, Self::Error>;

    /// Transition `id` to `REGISTERED`.
    async fn register(&self, id: PidId) -> Result<Pid, Self::Error>;
}

pub use memory::{InMemoryRelationStore, InMemoryTxn};
pub use identifiers::{InMemoryIdentifierStore, IdentifierError};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresRelationStore, PostgresConfig, PostgresTxn};
