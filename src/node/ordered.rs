//! Ordered node: dense sibling positions.
//!
//! Positioned children of a `(parent, kind)` group hold positions
//! `0..n-1`. Every insert and every reindexing remove rewrites the group
//! to restore that, inside the group's transaction. Edges created with
//! [`InsertAt::Unpositioned`] carry no position and are left out of every
//! position-based lookup.

use std::collections::BTreeMap;

use crate::error::RelationError;
use crate::store::{Direction, IdentifierStore, RelationStore, RelationTxn};
use crate::types::{InsertAt, Order, Pid, PidHandle, PidId, Relation, RelationKind};

use super::plain::PidNode;
use super::query::PidQuery;
use super::{settle, to_position};

/// A node under an ordered relation kind.
pub struct OrderedNode<R: RelationStore, I: IdentifierStore> {
    base: PidNode<R, I>,
}

impl<R: RelationStore, I: IdentifierStore> OrderedNode<R, I> {
    /// Wrap a plain node. Fails with [`RelationError::UnorderedKind`] if the
    /// node's kind is not ordered.
    pub fn new(base: PidNode<R, I>) -> Result<Self, RelationError> {
        if !base.kind().ordered {
            return Err(RelationError::UnorderedKind(base.kind().name.clone()));
        }
        Ok(Self { base })
    }

    /// The underlying plain node.
    pub fn base(&self) -> &PidNode<R, I> {
        &self.base
    }

    /// The identifier this node is bound to.
    pub fn pid(&self) -> &Pid {
        self.base.pid()
    }

    /// The relation kind this node is bound to.
    pub fn kind(&self) -> &RelationKind {
        self.base.kind()
    }

    /// Children of this node.
    pub fn children(&self) -> PidQuery<'_, R, I> {
        self.base.children()
    }

    /// Parents of this node.
    pub fn parents(&self) -> PidQuery<'_, R, I> {
        self.base.parents()
    }

    /// Insert `child` at `at`.
    ///
    /// `InsertAt::Index(n)` is clamped to the number of positioned
    /// siblings. Siblings at or after the insertion point move up by one.
    pub async fn insert_child(&self, child: impl Into<PidHandle>, at: InsertAt) -> Result<Relation, RelationError> {
        self.base.check_writable()?;
        let child = self.base.engine().resolve(child).await?;
        let mut txn = self.base.begin().await?;
        let outcome = self.insert_in(&mut txn, child.id, at).await;
        let relation = settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid().id,
            child = %child.id,
            kind = %self.kind().name,
            position = ?relation.position,
            "Relation created"
        );
        Ok(relation)
    }

    /// Remove `child`. With `reindex` the remaining siblings are renumbered
    /// densely; without it their positions are left as they are.
    pub async fn remove_child(&self, child: impl Into<PidHandle>, reindex: bool) -> Result<(), RelationError> {
        self.base.check_writable()?;
        let child = self.base.engine().resolve(child).await?;
        let mut txn = self.base.begin().await?;
        let outcome = self.remove_in(&mut txn, child.id, reindex).await;
        settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid().id,
            child = %child.id,
            kind = %self.kind().name,
            reindex,
            "Relation removed"
        );
        Ok(())
    }

    pub(crate) async fn insert_in(
        &self,
        txn: &mut R::Txn,
        child: PidId,
        at: InsertAt,
    ) -> Result<Relation, RelationError> {
        let index = match at {
            InsertAt::Unpositioned => return self.base.create_in(txn, child, None).await,
            InsertAt::Index(n) => n,
            InsertAt::Last => usize::MAX,
        };

        let mut order = positioned(txn.siblings().await?);
        let index = index.min(order.len());
        let mut relation = self.base.create_in(txn, child, None).await?;
        order.insert(index, child);
        rewrite(txn, &order).await?;

        relation.position = Some(to_position(index));
        Ok(relation)
    }

    pub(crate) async fn remove_in(
        &self,
        txn: &mut R::Txn,
        child: PidId,
        reindex: bool,
    ) -> Result<Relation, RelationError> {
        let relation = txn.delete(child).await?;
        if reindex {
            let order = positioned(txn.siblings().await?);
            rewrite(txn, &order).await?;
        }
        Ok(relation)
    }

    /// Position of `child`; `None` if the edge is unpositioned.
    ///
    /// Fails with [`RelationError::NotFound`] if `child` is not a child.
    pub async fn index_of(&self, child: impl Into<PidHandle>) -> Result<Option<u32>, RelationError> {
        let child = self.base.engine().resolve(child).await?;
        Ok(self.edge(child.id).await?.position)
    }

    /// Sibling with the nearest greater position.
    pub async fn next_of(&self, child: impl Into<PidHandle>) -> Result<Option<Pid>, RelationError> {
        self.neighbor_of(child, Direction::Next).await
    }

    /// Sibling with the nearest lesser position.
    pub async fn previous_of(&self, child: impl Into<PidHandle>) -> Result<Option<Pid>, RelationError> {
        self.neighbor_of(child, Direction::Previous).await
    }

    /// Child with the lowest position.
    pub async fn first_child(&self) -> Result<Option<Pid>, RelationError> {
        self.boundary(Order::Asc).await
    }

    /// Child with the highest position.
    pub async fn last_child(&self) -> Result<Option<Pid>, RelationError> {
        self.boundary(Order::Desc).await
    }

    /// Child at exactly `index`, if any.
    pub async fn child_at(&self, index: u32) -> Result<Option<Pid>, RelationError> {
        let children = self
            .base
            .engine()
            .relation_store()
            .children(self.pid().id, &self.kind().name, Some(Order::Asc))
            .await?;
        match children.into_iter().find(|r| r.position == Some(index)) {
            Some(relation) => self.base.engine().pid(relation.child).await.map(Some),
            None => Ok(None),
        }
    }

    /// Whether `child` holds the highest position.
    pub async fn is_last_child(&self, child: impl Into<PidHandle>) -> Result<bool, RelationError> {
        let child = self.base.engine().resolve(child).await?;
        Ok(self.last_child().await?.is_some_and(|last| last.id == child.id))
    }

    /// Whether `child` holds the lowest position.
    pub async fn is_first_child(&self, child: impl Into<PidHandle>) -> Result<bool, RelationError> {
        let child = self.base.engine().resolve(child).await?;
        Ok(self.first_child().await?.is_some_and(|first| first.id == child.id))
    }

    async fn edge(&self, child: PidId) -> Result<Relation, RelationError> {
        let parent = self.pid().id;
        let kind = &self.kind().name;
        self.base
            .engine()
            .relation_store()
            .get(parent, child, kind)
            .await?
            .ok_or_else(|| RelationError::NotFound {
                parent,
                child,
                kind: kind.clone(),
            })
    }

    async fn neighbor_of(&self, child: impl Into<PidHandle>, direction: Direction) -> Result<Option<Pid>, RelationError> {
        let child = self.base.engine().resolve(child).await?;
        let Some(position) = self.edge(child.id).await?.position else {
            return Ok(None);
        };
        let found = self
            .base
            .engine()
            .relation_store()
            .neighbor(self.pid().id, &self.kind().name, position, direction)
            .await?;
        match found {
            Some(relation) => self.base.engine().pid(relation.child).await.map(Some),
            None => Ok(None),
        }
    }

    async fn boundary(&self, order: Order) -> Result<Option<Pid>, RelationError> {
        let found = self
            .base
            .engine()
            .relation_store()
            .boundary(self.pid().id, &self.kind().name, order)
            .await?;
        match found {
            Some(relation) => self.base.engine().pid(relation.child).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Children of positioned edges, in position order.
fn positioned(siblings: Vec<Relation>) -> Vec<PidId> {
    siblings
        .into_iter()
        .filter(|r| r.position.is_some())
        .map(|r| r.child)
        .collect()
}

/// Give every child in `order` its index as position, skipping edges that
/// already hold it.
async fn rewrite<X: RelationTxn>(txn: &mut X, order: &[PidId]) -> Result<(), RelationError> {
    let current: BTreeMap<PidId, Option<u32>> = txn
        .siblings()
        .await?
        .into_iter()
        .map(|r| (r.child, r.position))
        .collect();

    let mut moved = 0usize;
    for (index, child) in order.iter().enumerate() {
        let position = Some(to_position(index));
        if current.get(child).copied().flatten() == position {
            continue;
        }
        txn.set_position(*child, position).await?;
        moved += 1;
    }
    tracing::debug!(
        parent = %txn.group().parent,
        kind = %txn.group().kind,
        sibling_count = order.len(),
        moved,
        "Reindexed siblings"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Relations;
    use crate::registry::{RelationKindRegistry, VERSION_KIND};
    use crate::store::{InMemoryIdentifierStore, InMemoryRelationStore};
    use crate::types::PidStatus;

    type Engine = Relations<InMemoryRelationStore, InMemoryIdentifierStore>;

    fn engine() -> Engine {
        Relations::new(
            InMemoryRelationStore::new(),
            InMemoryIdentifierStore::new(),
            RelationKindRegistry::new(vec![
                RelationKind::ordered("playlist"),
                RelationKind::versioning(VERSION_KIND),
            ])
            .unwrap(),
        )
    }

    fn pid(engine: &Engine, value: &str) -> Pid {
        engine
            .identifier_store()
            .create("recid", value, PidStatus::Registered)
            .unwrap()
    }

    async fn positions(node: &OrderedNode<InMemoryRelationStore, InMemoryIdentifierStore>) -> Vec<(String, Option<u32>)> {
        let mut result = Vec::new();
        for relation in node.children().relations().await.unwrap() {
            let pid = node.base().engine().pid(relation.child).await.unwrap();
            result.push((pid.pid_value, relation.position));
        }
        result
    }

    #[tokio::test]
    async fn test_append_and_navigate() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let (a, b, c) = (pid(&engine, "a"), pid(&engine, "b"), pid(&engine, "c"));
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();

        for child in [&a, &b, &c] {
            node.insert_child(child, InsertAt::Last).await.unwrap();
        }
        assert_eq!(node.index_of(&a).await.unwrap(), Some(0));
        assert_eq!(node.index_of(&c).await.unwrap(), Some(2));
        assert_eq!(node.next_of(&a).await.unwrap(), Some(b.clone()));
        assert_eq!(node.previous_of(&c).await.unwrap(), Some(b.clone()));
        assert_eq!(node.previous_of(&a).await.unwrap(), None);
        assert_eq!(node.last_child().await.unwrap(), Some(c.clone()));
        assert_eq!(node.first_child().await.unwrap(), Some(a.clone()));
        assert_eq!(node.child_at(1).await.unwrap(), Some(b.clone()));
        assert!(node.is_last_child(&c).await.unwrap());
        assert!(node.is_first_child(&a).await.unwrap());

        node.remove_child(&b, true).await.unwrap();
        assert_eq!(node.index_of(&c).await.unwrap(), Some(1));
        assert_eq!(node.next_of(&a).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn test_insert_at_index_shifts_siblings() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let (a, b, c) = (pid(&engine, "a"), pid(&engine, "b"), pid(&engine, "c"));
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();

        node.insert_child(&a, InsertAt::Last).await.unwrap();
        node.insert_child(&b, InsertAt::Last).await.unwrap();
        let relation = node.insert_child(&c, InsertAt::Index(0)).await.unwrap();
        assert_eq!(relation.position, Some(0));

        assert_eq!(
            positions(&node).await,
            vec![("c".into(), Some(0)), ("a".into(), Some(1)), ("b".into(), Some(2))]
        );
    }

    #[tokio::test]
    async fn test_index_is_clamped() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let a = pid(&engine, "a");
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();

        let relation = node.insert_child(&a, InsertAt::Index(42)).await.unwrap();
        assert_eq!(relation.position, Some(0));
    }

    #[tokio::test]
    async fn test_remove_without_reindex_leaves_hole() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let (a, b, c) = (pid(&engine, "a"), pid(&engine, "b"), pid(&engine, "c"));
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();
        for child in [&a, &b, &c] {
            node.insert_child(child, InsertAt::Last).await.unwrap();
        }

        node.remove_child(&b, false).await.unwrap();
        assert_eq!(node.index_of(&c).await.unwrap(), Some(2));
        assert_eq!(node.child_at(1).await.unwrap(), None);
        // Neighbors skip the hole.
        assert_eq!(node.next_of(&a).await.unwrap(), Some(c.clone()));
        assert_eq!(node.previous_of(&c).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_unpositioned_edges() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let (a, loose) = (pid(&engine, "a"), pid(&engine, "loose"));
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();

        node.insert_child(&a, InsertAt::Last).await.unwrap();
        node.insert_child(&loose, InsertAt::Unpositioned).await.unwrap();

        assert_eq!(node.index_of(&loose).await.unwrap(), None);
        assert_eq!(node.next_of(&loose).await.unwrap(), None);
        assert_eq!(node.last_child().await.unwrap(), Some(a.clone()));
        assert_eq!(node.children().count().await.unwrap(), 2);
        assert_eq!(node.children().ordered(Order::Asc).count().await.unwrap(), 1);

        // Appending after an unpositioned edge keeps positions dense.
        let b = pid(&engine, "b");
        let relation = node.insert_child(&b, InsertAt::Last).await.unwrap();
        assert_eq!(relation.position, Some(1));
    }

    #[tokio::test]
    async fn test_index_of_non_child() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let stranger = pid(&engine, "x");
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();

        assert!(matches!(
            node.index_of(&stranger).await,
            Err(RelationError::NotFound { .. })
        ));
        assert!(matches!(
            node.remove_child(&stranger, true).await,
            Err(RelationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert_leaves_positions_untouched() {
        let engine = engine();
        let parent = pid(&engine, "p");
        let (a, b) = (pid(&engine, "a"), pid(&engine, "b"));
        let node = engine.ordered_node(&parent, "playlist").await.unwrap();
        node.insert_child(&a, InsertAt::Last).await.unwrap();
        node.insert_child(&b, InsertAt::Last).await.unwrap();

        let err = node.insert_child(&b, InsertAt::Index(0)).await.unwrap_err();
        assert!(matches!(err, RelationError::Conflict { .. }));
        assert_eq!(
            positions(&node).await,
            vec![("a".into(), Some(0)), ("b".into(), Some(1))]
        );
    }
}
