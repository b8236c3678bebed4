//! The relation engine: stores plus kind registry, and node construction.

use std::sync::Arc;

use crate::error::RelationError;
use crate::node::{Node, OrderedNode, PidNode, VersioningNode};
use crate::registry::RelationKindRegistry;
use crate::store::{IdentifierStore, RelationStore};
use crate::types::{NodeType, Pid, PidHandle, PidId, RelationKind};

/// Entry point to the relation engine.
///
/// Holds the relation store, the identifier store, and the kind registry.
/// Cloning is cheap; clones share all three.
pub struct Relations<R: RelationStore, I: IdentifierStore> {
    relations: Arc<R>,
    identifiers: Arc<I>,
    kinds: Arc<RelationKindRegistry>,
}

impl<R: RelationStore, I: IdentifierStore> Relations<R, I> {
    /// Create an engine owning its stores.
    pub fn new(relations: R, identifiers: I, kinds: RelationKindRegistry) -> Self {
        Self::from_shared(Arc::new(relations), Arc::new(identifiers), Arc::new(kinds))
    }

    /// Create an engine from shared stores.
    pub fn from_shared(relations: Arc<R>, identifiers: Arc<I>, kinds: Arc<RelationKindRegistry>) -> Self {
        Self {
            relations,
            identifiers,
            kinds,
        }
    }

    /// The relation store.
    pub fn relation_store(&self) -> &R {
        &self.relations
    }

    /// The identifier store.
    pub fn identifier_store(&self) -> &I {
        &self.identifiers
    }

    /// The kind registry.
    pub fn kinds(&self) -> &RelationKindRegistry {
        &self.kinds
    }

    /// Hydrate a handle, looking up type+value references.
    pub async fn resolve(&self, handle: impl Into<PidHandle>) -> Result<Pid, RelationError> {
        match handle.into() {
            PidHandle::Resolved(pid) => Ok(pid),
            PidHandle::Fetched(pid_ref) => {
                let found = self
                    .identifiers
                    .resolve(&pid_ref)
                    .await
                    .map_err(RelationError::from_identifiers)?;
                found.ok_or(RelationError::PidNotFound(pid_ref))
            }
        }
    }

    /// Fetch an identifier by id.
    pub async fn pid(&self, id: PidId) -> Result<Pid, RelationError> {
        self.identifiers
            .get(id)
            .await
            .map_err(RelationError::from_identifiers)?
            .ok_or(RelationError::PidIdNotFound(id))
    }

    /// Fetch identifiers by id, preserving order.
    pub async fn pids(&self, ids: &[PidId]) -> Result<Vec<Pid>, RelationError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.identifiers
            .get_many(ids)
            .await
            .map_err(RelationError::from_identifiers)
    }

    /// Node view of `pid` under `kind`, using the kind's configured variant.
    ///
    /// For a versioning kind the view is bound the same way as
    /// [`versioning`](Self::versioning).
    pub async fn node(&self, pid: impl Into<PidHandle>, kind: &str) -> Result<Node<R, I>, RelationError> {
        let kind = self.kinds.resolve(kind)?.clone();
        let pid = self.resolve(pid).await?;
        Ok(match kind.node {
            NodeType::Unordered => Node::Unordered(PidNode::new(self.clone(), pid, kind)),
            NodeType::Ordered => Node::Ordered(OrderedNode::new(PidNode::new(self.clone(), pid, kind))?),
            NodeType::Versioning => Node::Versioning(self.versioning_node(pid, kind).await?),
        })
    }

    /// Plain node view, ignoring whether the kind is ordered.
    ///
    /// Fails with [`RelationError::VersioningState`] for a versioning kind;
    /// use [`versioning`](Self::versioning) instead.
    pub async fn plain_node(&self, pid: impl Into<PidHandle>, kind: &str) -> Result<PidNode<R, I>, RelationError> {
        let kind = self.kinds.resolve(kind)?.clone();
        let pid = self.resolve(pid).await?;
        let node = PidNode::new(self.clone(), pid, kind);
        node.check_writable()?;
        Ok(node)
    }

    /// Ordered node view; fails with [`RelationError::UnorderedKind`] for
    /// unordered kinds and [`RelationError::VersioningState`] for a
    /// versioning kind.
    pub async fn ordered_node(&self, pid: impl Into<PidHandle>, kind: &str) -> Result<OrderedNode<R, I>, RelationError> {
        OrderedNode::new(self.plain_node(pid, kind).await?)
    }

    /// Versioning view for `pid`.
    ///
    /// `pid` may be the versioning parent or any of its versions; for a
    /// version the view is bound to its parent.
    pub async fn versioning(&self, pid: impl Into<PidHandle>) -> Result<VersioningNode<R, I>, RelationError> {
        let kind = self.versioning_kind()?.clone();
        let pid = self.resolve(pid).await?;
        self.versioning_node(pid, kind).await
    }

    async fn versioning_node(&self, pid: Pid, kind: RelationKind) -> Result<VersioningNode<R, I>, RelationError> {
        let parents = self.relations.parents(pid.id, &kind.name).await?;
        let parent = match parents.first() {
            Some(edge) => self.pid(edge.parent).await?,
            None => pid,
        };
        Ok(VersioningNode::new(OrderedNode::new(PidNode::new(self.clone(), parent, kind))?))
    }

    fn versioning_kind(&self) -> Result<&RelationKind, RelationError> {
        self.kinds
            .versioning_kind()
            .ok_or_else(|| RelationError::UnknownKind(NodeType::Versioning.to_string()))
    }
}

impl<R: RelationStore, I: IdentifierStore> Clone for Relations<R, I> {
    fn clone(&self) -> Self {
        Self {
            relations: Arc::clone(&self.relations),
            identifiers: Arc::clone(&self.identifiers),
            kinds: Arc::clone(&self.kinds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{COLLECTION_KIND, VERSION_KIND};
    use crate::store::{InMemoryIdentifierStore, InMemoryRelationStore};
    use crate::types::{InsertAt, PidRef, PidStatus};

    fn engine() -> Relations<InMemoryRelationStore, InMemoryIdentifierStore> {
        Relations::new(
            InMemoryRelationStore::new(),
            InMemoryIdentifierStore::new(),
            RelationKindRegistry::with_defaults(),
        )
    }

    #[tokio::test]
    async fn test_resolve_fetched_reference() {
        let engine = engine();
        let pid = engine
            .identifier_store()
            .create("recid", "1", PidStatus::Registered)
            .unwrap();

        let resolved = engine.resolve(PidRef::new("recid", "1")).await.unwrap();
        assert_eq!(resolved, pid);

        let err = engine.resolve(PidRef::new("recid", "2")).await.unwrap_err();
        assert!(matches!(err, RelationError::PidNotFound(_)));
    }

    #[tokio::test]
    async fn test_node_dispatches_on_kind() {
        let engine = engine();
        let pid = engine
            .identifier_store()
            .create("recid", "1", PidStatus::Registered)
            .unwrap();

        let node = engine.node(&pid, VERSION_KIND).await.unwrap();
        assert!(matches!(node, Node::Versioning(_)));

        let node = engine.node(&pid, COLLECTION_KIND).await.unwrap();
        assert!(matches!(node, Node::Unordered(_)));

        assert!(matches!(
            engine.ordered_node(&pid, COLLECTION_KIND).await,
            Err(RelationError::UnorderedKind(_))
        ));
        assert!(matches!(
            engine.node(&pid, "nope").await,
            Err(RelationError::UnknownKind(_))
        ));
    }

    #[tokio::test]
    async fn test_versioning_kind_needs_versioning_node() {
        let engine = engine();
        let head = engine
            .identifier_store()
            .create("recid", "h", PidStatus::Reserved)
            .unwrap();
        let draft = engine
            .identifier_store()
            .create("recid", "d", PidStatus::Reserved)
            .unwrap();

        assert!(matches!(
            engine.plain_node(&head, VERSION_KIND).await,
            Err(RelationError::VersioningState(_))
        ));
        assert!(matches!(
            engine.ordered_node(&head, VERSION_KIND).await,
            Err(RelationError::VersioningState(_))
        ));

        // The ordered layer of a versioning node is read-only.
        let node = engine.versioning(&head).await.unwrap();
        let err = node
            .ordered()
            .insert_child(&draft, InsertAt::Last)
            .await
            .unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
        let err = node.ordered().base().insert_child(&draft).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
        assert_eq!(engine.relation_store().num_relations(), 0);
        assert_eq!(node.ordered().first_child().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_node_binds_version_to_its_parent() {
        let engine = engine();
        let ids = engine.identifier_store();
        let head = ids.create("recid", "h", PidStatus::Reserved).unwrap();
        let v1 = ids.create("recid", "v1", PidStatus::Registered).unwrap();
        engine
            .versioning(&head)
            .await
            .unwrap()
            .insert_version_child(&v1, InsertAt::Last)
            .await
            .unwrap();

        let node = engine.node(&v1, VERSION_KIND).await.unwrap();
        assert_eq!(node.pid().id, head.id);
        assert_eq!(node.children().all().await.unwrap(), vec![v1]);
    }
}
