//! Store doubles shared by the integration tests.
//!
//! - [`YieldingStore`] yields to the scheduler before every store call, so
//!   concurrent transactions interleave the way they do against a real
//!   database.
//! - [`FlakyIdentifiers`] can be told to fail redirects.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pid_relations::{
    Direction, IdentifierError, IdentifierStore, InMemoryIdentifierStore, InMemoryRelationStore,
    InMemoryTxn, Order, Pid, PidId, PidRef, Relation, RelationStore, RelationTxn, SiblingGroup,
    StoreError,
};
use tokio::task::yield_now;

// ─────────────────────────────────────────────────────────────────────────────
// Relation store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory relation store that yields before every operation.
#[derive(Debug, Clone, Default)]
pub struct YieldingStore {
    pub inner: InMemoryRelationStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct YieldingTxn(InMemoryTxn);

#[async_trait]
impl RelationTxn for YieldingTxn {
    fn group(&self) -> &SiblingGroup {
        self.0.group()
    }

    async fn siblings(&mut self) -> Result<Vec<Relation>, StoreError> {
        yield_now().await;
        self.0.siblings().await
    }

    async fn child_count(&mut self) -> Result<usize, StoreError> {
        yield_now().await;
        self.0.child_count().await
    }

    async fn lock_child(&mut self, child: PidId) -> Result<(), StoreError> {
        yield_now().await;
        self.0.lock_child(child).await
    }

    async fn parent_count(&mut self, child: PidId) -> Result<usize, StoreError> {
        yield_now().await;
        self.0.parent_count(child).await
    }

    async fn create(&mut self, child: PidId, position: Option<u32>) -> Result<Relation, StoreError> {
        yield_now().await;
        self.0.create(child, position).await
    }

    async fn delete(&mut self, child: PidId) -> Result<Relation, StoreError> {
        yield_now().await;
        self.0.delete(child).await
    }

    async fn set_position(&mut self, child: PidId, position: Option<u32>) -> Result<(), StoreError> {
        yield_now().await;
        self.0.set_position(child, position).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        yield_now().await;
        self.0.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.0.rollback().await
    }
}

#[async_trait]
impl RelationStore for YieldingStore {
    type Txn = YieldingTxn;

    async fn begin(&self, group: &SiblingGroup) -> Result<Self::Txn, StoreError> {
        yield_now().await;
        Ok(YieldingTxn(self.inner.begin(group).await?))
    }

    async fn get(&self, parent: PidId, child: PidId, kind: &str) -> Result<Option<Relation>, StoreError> {
        yield_now().await;
        self.inner.get(parent, child, kind).await
    }

    async fn children(&self, parent: PidId, kind: &str, order: Option<Order>) -> Result<Vec<Relation>, StoreError> {
        yield_now().await;
        self.inner.children(parent, kind, order).await
    }

    async fn parents(&self, child: PidId, kind: &str) -> Result<Vec<Relation>, StoreError> {
        yield_now().await;
        self.inner.parents(child, kind).await
    }

    async fn has_children(&self, parent: PidId, kind: &str) -> Result<bool, StoreError> {
        self.inner.has_children(parent, kind).await
    }

    async fn has_parents(&self, child: PidId, kind: &str) -> Result<bool, StoreError> {
        self.inner.has_parents(child, kind).await
    }

    async fn neighbor(
        &self,
        parent: PidId,
        kind: &str,
        position: u32,
        direction: Direction,
    ) -> Result<Option<Relation>, StoreError> {
        self.inner.neighbor(parent, kind, position, direction).await
    }

    async fn boundary(&self, parent: PidId, kind: &str, order: Order) -> Result<Option<Relation>, StoreError> {
        self.inner.boundary(parent, kind, order).await
    }

    async fn relations_of(&self, pid: PidId) -> Result<Vec<Relation>, StoreError> {
        self.inner.relations_of(pid).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FlakyError {
    #[error("identifier service unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] IdentifierError),
}

/// In-memory identifier store whose redirects can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct FlakyIdentifiers {
    pub inner: InMemoryIdentifierStore,
    fail_redirects: Arc<AtomicBool>,
}

impl FlakyIdentifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_redirects(&self, fail: bool) {
        self.fail_redirects.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentifierStore for FlakyIdentifiers {
    type Error = FlakyError;

    async fn resolve(&self, pid_ref: &PidRef) -> Result<Option<Pid>, Self::Error> {
        Ok(self.inner.resolve(pid_ref).await?)
    }

    async fn get(&self, id: PidId) -> Result<Option<Pid>, Self::Error> {
        Ok(self.inner.get(id).await?)
    }

    async fn get_many(&self, ids: &[PidId]) -> Result<Vec<Pid>, Self::Error> {
        Ok(self.inner.get_many(ids).await?)
    }

    async fn redirect(&self, id: PidId, target: PidId) -> Result<Pid, Self::Error> {
        if self.fail_redirects.load(Ordering::SeqCst) {
            return Err(FlakyError::Unavailable);
        }
        Ok(self.inner.redirect(id, target).await?)
    }

    async fn register(&self, id: PidId) -> Result<Pid, Self::Error> {
        Ok(self.inner.register(id).await?)
    }
}
