//! Versioning node.
//!
//! A versioning parent stands for every version of a record. Its ordered
//! children split by identifier status:
//!
//! - `REGISTERED` children are published versions.
//! - At most one `RESERVED` child is the draft of the next version. It is
//!   kept after every published version.
//!
//! Whenever versions change, the parent is redirected to the published
//! version with the highest position, and a `RESERVED` parent is
//! registered the first time that happens.
//!
//! All checks run inside the sibling group's transaction, so two
//! concurrent draft inserts cannot both succeed. The parent's identifier
//! is only written once the edges have committed: a second pass over the
//! group, under the group lock, derives the redirect from committed state.
//! A failed identifier write is reported to the caller and repaired by the
//! next mutation or [`VersioningNode::update_redirect`].

use std::collections::BTreeMap;

use crate::error::RelationError;
use crate::registry::RECORD_DRAFT_KIND;
use crate::store::{IdentifierStore, RelationStore, RelationTxn};
use crate::types::{InsertAt, Order, Pid, PidHandle, PidId, PidStatus, Relation, RelationKind};

use super::ordered::OrderedNode;
use super::query::PidQuery;
use super::settle;

/// Versioning view of a parent identifier.
pub struct VersioningNode<R: RelationStore, I: IdentifierStore> {
    ordered: OrderedNode<R, I>,
}

/// A sibling edge paired with its child identifier.
struct Sibling {
    relation: Relation,
    pid: Pid,
}

impl<R: RelationStore, I: IdentifierStore> VersioningNode<R, I> {
    /// Wrap an ordered node bound to the versioning kind.
    pub fn new(ordered: OrderedNode<R, I>) -> Self {
        Self { ordered }
    }

    /// The underlying ordered node.
    pub fn ordered(&self) -> &OrderedNode<R, I> {
        &self.ordered
    }

    /// The versioning parent.
    pub fn pid(&self) -> &Pid {
        self.ordered.pid()
    }

    /// The versioning kind.
    pub fn kind(&self) -> &RelationKind {
        self.ordered.kind()
    }

    /// Published versions.
    pub fn children(&self) -> PidQuery<'_, R, I> {
        self.ordered.children().status([PidStatus::Registered])
    }

    /// The draft child, if any.
    pub async fn draft_child(&self) -> Result<Option<Pid>, RelationError> {
        self.ordered
            .children()
            .status([PidStatus::Reserved])
            .one_or_none()
            .await
    }

    /// The published version with the highest position.
    pub async fn last_version(&self) -> Result<Option<Pid>, RelationError> {
        self.children()
            .ordered(Order::Desc)
            .first()
            .await
    }

    /// The identifier linked to the draft under the record/draft kind.
    ///
    /// `None` if there is no draft, the draft has no such link, or the
    /// registry has no record/draft kind.
    pub async fn draft_child_deposit(&self) -> Result<Option<Pid>, RelationError> {
        let Some(draft) = self.draft_child().await? else {
            return Ok(None);
        };
        let engine = self.ordered.base().engine();
        if engine.kinds().get(RECORD_DRAFT_KIND).is_none() {
            return Ok(None);
        }
        let draft = engine.plain_node(draft, RECORD_DRAFT_KIND).await?;
        draft.children().one_or_none().await
    }

    /// Insert a published version.
    ///
    /// With [`InsertAt::Last`] and an existing draft, the version goes
    /// right before the draft. Fails with
    /// [`RelationError::VersioningState`] if `child` is `RESERVED` or `at`
    /// is [`InsertAt::Unpositioned`].
    pub async fn insert_version_child(
        &self,
        child: impl Into<PidHandle>,
        at: InsertAt,
    ) -> Result<Relation, RelationError> {
        if at == InsertAt::Unpositioned {
            return Err(RelationError::VersioningState(format!(
                "versions of {} must be positioned",
                self.pid().id
            )));
        }
        let child = self.ordered.base().engine().resolve(child).await?;
        if child.is(PidStatus::Reserved) {
            return Err(RelationError::VersioningState(format!(
                "version {} is RESERVED; use insert_draft_child for drafts",
                child.id
            )));
        }

        let mut txn = self.ordered.base().begin().await?;
        let outcome = self.insert_version_in(&mut txn, child.id, at).await;
        let relation = settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid().id,
            child = %child.id,
            position = ?relation.position,
            "Version inserted"
        );
        self.sync_redirect().await?;
        Ok(relation)
    }

    async fn insert_version_in(
        &self,
        txn: &mut R::Txn,
        child: PidId,
        at: InsertAt,
    ) -> Result<Relation, RelationError> {
        let at = match at {
            InsertAt::Last => match self.draft_position(txn).await? {
                Some(index) => InsertAt::Index(index),
                None => InsertAt::Last,
            },
            other => other,
        };
        self.ordered.insert_in(txn, child, at).await
    }

    /// Remove a published version and reindex.
    ///
    /// Fails with [`RelationError::VersioningState`] if `child` is the
    /// draft or the only published version.
    pub async fn remove_version_child(&self, child: impl Into<PidHandle>) -> Result<(), RelationError> {
        let child = self.ordered.base().engine().resolve(child).await?;
        if child.is(PidStatus::Reserved) {
            return Err(RelationError::VersioningState(format!(
                "version {} is RESERVED; use remove_draft_child for drafts",
                child.id
            )));
        }

        let mut txn = self.ordered.base().begin().await?;
        let outcome = self.remove_version_in(&mut txn, &child).await;
        settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid().id,
            child = %child.id,
            "Version removed"
        );
        self.sync_redirect().await?;
        Ok(())
    }

    async fn remove_version_in(&self, txn: &mut R::Txn, child: &Pid) -> Result<(), RelationError> {
        if child.is(PidStatus::Registered) {
            let siblings = self.siblings(txn).await?;
            let published = siblings
                .iter()
                .filter(|s| s.pid.is(PidStatus::Registered) && s.relation.position.is_some())
                .count();
            let is_child = siblings.iter().any(|s| s.pid.id == child.id);
            if is_child && published == 1 {
                return Err(RelationError::VersioningState(format!(
                    "cannot remove {}, the last version of {}",
                    child.id,
                    self.pid().id
                )));
            }
        }
        self.ordered.remove_in(txn, child.id, true).await?;
        Ok(())
    }

    /// Insert the draft of the next version, after every published one.
    ///
    /// Fails with [`RelationError::VersioningState`] if `child` is not
    /// `RESERVED` or a draft already exists.
    pub async fn insert_draft_child(&self, child: impl Into<PidHandle>) -> Result<Relation, RelationError> {
        let child = self.ordered.base().engine().resolve(child).await?;
        if !child.is(PidStatus::Reserved) {
            return Err(RelationError::VersioningState(format!(
                "draft {} has status {}, expected RESERVED",
                child.id, child.status
            )));
        }

        let mut txn = self.ordered.base().begin().await?;
        let outcome = self.insert_draft_in(&mut txn, child.id).await;
        let relation = settle(txn, outcome).await?;
        tracing::info!(
            parent = %self.pid().id,
            child = %child.id,
            position = ?relation.position,
            "Draft inserted"
        );
        Ok(relation)
    }

    async fn insert_draft_in(&self, txn: &mut R::Txn, child: PidId) -> Result<Relation, RelationError> {
        if let Some(draft) = self.draft_in(txn).await? {
            return Err(RelationError::VersioningState(format!(
                "draft already exists for {}: {}",
                self.pid().id,
                draft.pid.to_ref()
            )));
        }
        self.ordered.insert_in(txn, child, InsertAt::Last).await
    }

    /// Remove the draft and reindex. Returns the removed draft, `None` if
    /// there was none.
    pub async fn remove_draft_child(&self) -> Result<Option<Pid>, RelationError> {
        let mut txn = self.ordered.base().begin().await?;
        let outcome = self.remove_draft_in(&mut txn).await;
        let removed = settle(txn, outcome).await?;
        if let Some(draft) = &removed {
            tracing::info!(
                parent = %self.pid().id,
                child = %draft.id,
                "Draft removed"
            );
        }
        Ok(removed)
    }

    async fn remove_draft_in(&self, txn: &mut R::Txn) -> Result<Option<Pid>, RelationError> {
        let Some(draft) = self.draft_in(txn).await? else {
            return Ok(None);
        };
        self.ordered.remove_in(txn, draft.pid.id, true).await?;
        Ok(Some(draft.pid))
    }

    /// Point the parent at its last published version.
    ///
    /// Call after a child's status changed out of band, such as a draft
    /// being published. Returns the redirect target, `None` if nothing is
    /// published.
    pub async fn update_redirect(&self) -> Result<Option<PidId>, RelationError> {
        self.sync_redirect().await
    }

    /// Write the redirect implied by the committed versions.
    ///
    /// Holds the group lock, so redirects land in commit order. Returns the
    /// parent's redirect afterwards.
    async fn sync_redirect(&self) -> Result<Option<PidId>, RelationError> {
        let mut txn = self.ordered.base().begin().await?;
        let outcome = self.redirect_in(&mut txn).await;
        settle(txn, outcome).await
    }

    async fn redirect_in(&self, txn: &mut R::Txn) -> Result<Option<PidId>, RelationError> {
        let target = self
            .siblings(txn)
            .await?
            .into_iter()
            .filter(|s| s.pid.is(PidStatus::Registered))
            .filter_map(|s| s.relation.position.map(|p| (p, s.pid.id)))
            .max_by_key(|(position, _)| *position)
            .map(|(_, id)| id);
        let engine = self.ordered.base().engine();
        let parent = engine.pid(self.pid().id).await?;
        let Some(target) = target else {
            return Ok(parent.redirect);
        };

        // Redirect before registering: a failed redirect leaves the parent
        // untouched.
        let identifiers = engine.identifier_store();
        if parent.redirect != Some(target) {
            identifiers.redirect(parent.id, target).await.map_err(|e| {
                tracing::warn!(pid = %parent.id, target = %target, error = %e, "Failed to redirect versioning parent");
                RelationError::from_identifiers(e)
            })?;
            tracing::info!(pid = %parent.id, target = %target, "Versioning parent redirected");
        }
        if parent.is(PidStatus::Reserved) {
            identifiers.register(parent.id).await.map_err(|e| {
                tracing::warn!(pid = %parent.id, error = %e, "Failed to register versioning parent");
                RelationError::from_identifiers(e)
            })?;
            tracing::info!(pid = %parent.id, "Versioning parent registered");
        }
        Ok(Some(target))
    }

    /// Index of the draft among positioned siblings.
    async fn draft_position(&self, txn: &mut R::Txn) -> Result<Option<usize>, RelationError> {
        let siblings = self.siblings(txn).await?;
        Ok(siblings
            .iter()
            .filter(|s| s.relation.position.is_some())
            .position(|s| s.pid.is(PidStatus::Reserved)))
    }

    async fn draft_in(&self, txn: &mut R::Txn) -> Result<Option<Sibling>, RelationError> {
        Ok(self
            .siblings(txn)
            .await?
            .into_iter()
            .find(|s| s.pid.is(PidStatus::Reserved)))
    }

    /// The group's edges as seen by `txn`, with their child identifiers.
    async fn siblings(&self, txn: &mut R::Txn) -> Result<Vec<Sibling>, RelationError> {
        let relations = txn.siblings().await?;
        let ids: Vec<PidId> = relations.iter().map(|r| r.child).collect();
        let mut pids: BTreeMap<PidId, Pid> = self
            .ordered
            .base()
            .engine()
            .pids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        Ok(relations
            .into_iter()
            .filter_map(|relation| {
                let pid = pids.remove(&relation.child)?;
                Some(Sibling { relation, pid })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Relations;
    use crate::registry::RelationKindRegistry;
    use crate::store::{InMemoryIdentifierStore, InMemoryRelationStore};

    type Engine = Relations<InMemoryRelationStore, InMemoryIdentifierStore>;

    fn engine() -> Engine {
        Relations::new(
            InMemoryRelationStore::new(),
            InMemoryIdentifierStore::new(),
            RelationKindRegistry::with_defaults(),
        )
    }

    fn pid(engine: &Engine, value: &str, status: PidStatus) -> Pid {
        engine
            .identifier_store()
            .create("recid", value, status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_reserved_version_rejected() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let draft = pid(&engine, "d", PidStatus::Reserved);
        let node = engine.versioning(&head).await.unwrap();

        let err = node.insert_version_child(&draft, InsertAt::Last).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
        assert_eq!(engine.relation_store().num_relations(), 0);
    }

    #[tokio::test]
    async fn test_registered_draft_rejected() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let v1 = pid(&engine, "v1", PidStatus::Registered);
        let node = engine.versioning(&head).await.unwrap();

        let err = node.insert_draft_child(&v1).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
    }

    #[tokio::test]
    async fn test_second_draft_names_existing() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let d1 = pid(&engine, "d1", PidStatus::Reserved);
        let d2 = pid(&engine, "d2", PidStatus::Reserved);
        let node = engine.versioning(&head).await.unwrap();

        node.insert_draft_child(&d1).await.unwrap();
        let err = node.insert_draft_child(&d2).await.unwrap_err();
        assert!(err.to_string().contains("recid:d1"));
        assert_eq!(node.draft_child().await.unwrap(), Some(d1));
    }

    #[tokio::test]
    async fn test_remove_missing_draft_is_noop() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let node = engine.versioning(&head).await.unwrap();
        assert_eq!(node.remove_draft_child().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_version_cannot_be_removed() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let v1 = pid(&engine, "v1", PidStatus::Registered);
        let node = engine.versioning(&head).await.unwrap();

        node.insert_version_child(&v1, InsertAt::Last).await.unwrap();
        let err = node.remove_version_child(&v1).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
        assert_eq!(node.children().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unpositioned_version_rejected() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let v1 = pid(&engine, "v1", PidStatus::Registered);
        let v2 = pid(&engine, "v2", PidStatus::Registered);
        let node = engine.versioning(&head).await.unwrap();

        node.insert_version_child(&v1, InsertAt::Last).await.unwrap();
        let err = node
            .insert_version_child(&v2, InsertAt::Unpositioned)
            .await
            .unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));

        // v1 stays the only positioned version, so it cannot be removed.
        let err = node.remove_version_child(&v1).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
        let head = engine.pid(head.id).await.unwrap();
        assert_eq!(head.redirect, Some(v1.id));
        assert_eq!(node.children().all().await.unwrap(), vec![v1]);
    }

    #[tokio::test]
    async fn test_draft_cannot_be_removed_as_version() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let draft = pid(&engine, "d", PidStatus::Reserved);
        let node = engine.versioning(&head).await.unwrap();

        node.insert_draft_child(&draft).await.unwrap();
        let err = node.remove_version_child(&draft).await.unwrap_err();
        assert!(matches!(err, RelationError::VersioningState(_)));
    }

    #[tokio::test]
    async fn test_update_redirect_after_publish() {
        let engine = engine();
        let ids = engine.identifier_store().clone();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let v1 = pid(&engine, "v1", PidStatus::Registered);
        let draft = pid(&engine, "d", PidStatus::Reserved);
        let node = engine.versioning(&head).await.unwrap();

        node.insert_version_child(&v1, InsertAt::Last).await.unwrap();
        node.insert_draft_child(&draft).await.unwrap();
        assert_eq!(node.update_redirect().await.unwrap(), Some(v1.id));

        ids.set_status(draft.id, PidStatus::Registered).unwrap();
        assert_eq!(node.update_redirect().await.unwrap(), Some(draft.id));
        assert_eq!(node.last_version().await.unwrap().map(|p| p.id), Some(draft.id));
        assert_eq!(node.draft_child().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_draft_child_deposit() {
        let engine = engine();
        let head = pid(&engine, "h", PidStatus::Reserved);
        let draft = pid(&engine, "d", PidStatus::Reserved);
        let deposit = pid(&engine, "dep", PidStatus::Registered);
        let node = engine.versioning(&head).await.unwrap();

        assert_eq!(node.draft_child_deposit().await.unwrap(), None);
        node.insert_draft_child(&draft).await.unwrap();
        engine
            .plain_node(&draft, RECORD_DRAFT_KIND)
            .await
            .unwrap()
            .insert_child(&deposit)
            .await
            .unwrap();
        assert_eq!(node.draft_child_deposit().await.unwrap(), Some(deposit));
    }
}
