//! Lazy parent/child queries.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::Relations;
use crate::error::RelationError;
use crate::store::{IdentifierStore, RelationStore};
use crate::types::{Order, Pid, PidId, PidStatus, Relation, RelationKind};

/// Which end of the edges a query walks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Edges where the node is the parent.
    Children,
    /// Edges where the node is the child.
    Parents,
}

/// Query builder over a node's children or parents.
///
/// Nothing is fetched until a terminal call (`all`, `first`, `count`, ...).
/// Every terminal call runs the query again, so a builder can be reused to
/// observe later writes.
pub struct PidQuery<'a, R: RelationStore, I: IdentifierStore> {
    engine: &'a Relations<R, I>,
    pid: PidId,
    kind: &'a RelationKind,
    side: Side,
    statuses: Option<BTreeSet<PidStatus>>,
    order: Option<Order>,
}

impl<'a, R: RelationStore, I: IdentifierStore> PidQuery<'a, R, I> {
    pub(crate) fn new(engine: &'a Relations<R, I>, pid: PidId, kind: &'a RelationKind, side: Side) -> Self {
        Self {
            engine,
            pid,
            kind,
            side,
            statuses: None,
            order: None,
        }
    }

    /// Only yield identifiers with one of these statuses.
    pub fn status(mut self, statuses: impl IntoIterator<Item = PidStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Sort by position. Only positioned edges are returned.
    ///
    /// Terminal calls fail with [`RelationError::UnorderedKind`] if the kind
    /// is unordered.
    pub fn ordered(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    /// Which end this query walks to.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Matching edges.
    pub async fn relations(&self) -> Result<Vec<Relation>, RelationError> {
        Ok(self.fetch().await?.into_iter().map(|(relation, _)| relation).collect())
    }

    /// Matching identifiers.
    pub async fn all(&self) -> Result<Vec<Pid>, RelationError> {
        Ok(self.fetch().await?.into_iter().map(|(_, pid)| pid).collect())
    }

    /// First matching identifier.
    pub async fn first(&self) -> Result<Option<Pid>, RelationError> {
        Ok(self.all().await?.into_iter().next())
    }

    /// The only matching identifier, `None` if there is none.
    ///
    /// Fails with [`RelationError::MultipleResults`] on more than one match.
    pub async fn one_or_none(&self) -> Result<Option<Pid>, RelationError> {
        let mut pids = self.all().await?;
        match pids.len() {
            0 | 1 => Ok(pids.pop()),
            found => Err(RelationError::MultipleResults {
                kind: self.kind.name.clone(),
                pid: self.pid,
                found,
            }),
        }
    }

    /// Number of matches.
    pub async fn count(&self) -> Result<usize, RelationError> {
        if self.statuses.is_none() {
            return Ok(self.edges().await?.len());
        }
        Ok(self.fetch().await?.len())
    }

    /// Whether anything matches.
    pub async fn exists(&self) -> Result<bool, RelationError> {
        if self.statuses.is_none() && self.order.is_none() {
            let store = self.engine.relation_store();
            let found = match self.side {
                Side::Children => store.has_children(self.pid, &self.kind.name).await?,
                Side::Parents => store.has_parents(self.pid, &self.kind.name).await?,
            };
            return Ok(found);
        }
        Ok(self.count().await? > 0)
    }

    async fn edges(&self) -> Result<Vec<Relation>, RelationError> {
        if self.order.is_some() && !self.kind.ordered {
            return Err(RelationError::UnorderedKind(self.kind.name.clone()));
        }
        let store = self.engine.relation_store();
        let edges = match self.side {
            Side::Children => store.children(self.pid, &self.kind.name, self.order).await?,
            Side::Parents => {
                let mut edges = store.parents(self.pid, &self.kind.name).await?;
                if let Some(order) = self.order {
                    edges.retain(|r| r.position.is_some());
                    edges.sort();
                    if order == Order::Desc {
                        edges.reverse();
                    }
                }
                edges
            }
        };
        tracing::debug!(
            pid = %self.pid,
            kind = %self.kind.name,
            side = ?self.side,
            edge_count = edges.len(),
            "Relation query"
        );
        Ok(edges)
    }

    /// Edges paired with the identifier at the far end, status-filtered.
    async fn fetch(&self) -> Result<Vec<(Relation, Pid)>, RelationError> {
        let edges = self.edges().await?;
        let ids: Vec<PidId> = edges.iter().map(|r| self.far_end(r)).collect();
        let pids = self.engine.pids(&ids).await?;

        // get_many skips unknown ids, so pair by id rather than by index.
        let mut by_id: BTreeMap<PidId, Pid> = pids.into_iter().map(|p| (p.id, p)).collect();
        Ok(edges
            .into_iter()
            .filter_map(|relation| {
                let pid = by_id.remove(&self.far_end(&relation))?;
                let keep = self
                    .statuses
                    .as_ref()
                    .map_or(true, |statuses| statuses.contains(&pid.status));
                keep.then_some((relation, pid))
            })
            .collect())
    }

    fn far_end(&self, relation: &Relation) -> PidId {
        match self.side {
            Side::Children => relation.child,
            Side::Parents => relation.parent,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Relations;
    use crate::error::RelationError;
    use crate::registry::{RelationKindRegistry, COLLECTION_KIND, VERSION_KIND};
    use crate::store::{InMemoryIdentifierStore, InMemoryRelationStore, RelationStore};
    use crate::types::{Order, PidStatus};

    fn engine() -> Relations<InMemoryRelationStore, InMemoryIdentifierStore> {
        Relations::new(
            InMemoryRelationStore::new(),
            InMemoryIdentifierStore::new(),
            RelationKindRegistry::with_defaults(),
        )
    }

    #[tokio::test]
    async fn test_status_filter() {
        let engine = engine();
        let ids = engine.identifier_store();
        let parent = ids.create("recid", "p", PidStatus::Registered).unwrap();
        let published = ids.create("recid", "a", PidStatus::Registered).unwrap();
        let reserved = ids.create("recid", "b", PidStatus::Reserved).unwrap();

        let node = engine.plain_node(&parent, COLLECTION_KIND).await.unwrap();
        node.insert_child(&published).await.unwrap();
        node.insert_child(&reserved).await.unwrap();

        assert_eq!(node.children().count().await.unwrap(), 2);
        let query = node.children().status([PidStatus::Reserved]);
        assert_eq!(query.all().await.unwrap(), vec![reserved.clone()]);
        assert_eq!(query.one_or_none().await.unwrap(), Some(reserved));
        assert!(!node.children().status([PidStatus::Deleted]).exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_order_on_unordered_kind_fails() {
        let engine = engine();
        let parent = engine
            .identifier_store()
            .create("recid", "p", PidStatus::Registered)
            .unwrap();
        let node = engine.plain_node(&parent, COLLECTION_KIND).await.unwrap();

        let err = node.children().ordered(Order::Asc).all().await.unwrap_err();
        assert!(matches!(err, RelationError::UnorderedKind(_)));
    }

    #[tokio::test]
    async fn test_ordered_and_restartable() {
        let engine = engine();
        let ids = engine.identifier_store();
        let parent = ids.create("recid", "p", PidStatus::Registered).unwrap();
        let a = ids.create("recid", "a", PidStatus::Registered).unwrap();
        let b = ids.create("recid", "b", PidStatus::Registered).unwrap();
        let store = engine.relation_store();
        store.create(parent.id, b.id, VERSION_KIND, Some(1)).await.unwrap();

        let node = engine.versioning(&parent).await.unwrap();
        let query = node.ordered().children().ordered(Order::Desc);
        assert_eq!(query.all().await.unwrap(), vec![b.clone()]);

        store.create(parent.id, a.id, VERSION_KIND, Some(0)).await.unwrap();
        assert_eq!(query.all().await.unwrap(), vec![b.clone(), a.clone()]);
        assert_eq!(query.first().await.unwrap(), Some(b));
        assert!(matches!(
            query.one_or_none().await,
            Err(RelationError::MultipleResults { found: 2, .. })
        ));
    }
}
