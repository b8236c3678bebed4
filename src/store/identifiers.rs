//! In-memory identifier store.
//!
//! Stands in for the external identifier service in tests and embedded
//! deployments. It is the only component that creates identifiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{Pid, PidId, PidRef, PidStatus};
use super::IdentifierStore;

/// Error type for the in-memory identifier store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentifierError {
    /// Identifier not found.
    #[error("Identifier not found: {0}")]
    NotFound(PidId),
    /// Type+value pair already taken.
    #[error("Identifier already exists: {0}")]
    AlreadyExists(PidRef),
    /// Transition not allowed from the current status.
    #[error("Cannot {action} identifier {id} with status {status}")]
    InvalidStatus {
        /// Identifier.
        id: PidId,
        /// Current status.
        status: PidStatus,
        /// Attempted action.
        action: &'static str,
    },
}

#[derive(Debug, Default)]
struct Registry {
    by_id: BTreeMap<PidId, Pid>,
    by_ref: BTreeMap<PidRef, PidId>,
}

/// In-memory identifier store.
///
/// Uses BTreeMap for deterministic iteration order. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentifierStore {
    inner: Arc<RwLock<Registry>>,
}

impl InMemoryIdentifierStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identifier with a random id.
    pub fn create(
        &self,
        pid_type: impl Into<String>,
        pid_value: impl Into<String>,
        status: PidStatus,
    ) -> Result<Pid, IdentifierError> {
        self.insert(Pid::new(PidId::random(), pid_type, pid_value, status))
    }

    /// Add a fully specified identifier.
    pub fn insert(&self, pid: Pid) -> Result<Pid, IdentifierError> {
        let mut inner = self.inner.write();
        let pid_ref = pid.to_ref();
        if inner.by_ref.contains_key(&pid_ref) {
            return Err(IdentifierError::AlreadyExists(pid_ref));
        }
        inner.by_ref.insert(pid_ref, pid.id);
        inner.by_id.insert(pid.id, pid.clone());
        Ok(pid)
    }

    /// Change the status of an identifier out-of-band.
    ///
    /// Models a status change performed by the owning service, such as a
    /// draft being published.
    pub fn set_status(&self, id: PidId, status: PidStatus) -> Result<Pid, IdentifierError> {
        let mut inner = self.inner.write();
        let pid = inner.by_id.get_mut(&id).ok_or(IdentifierError::NotFound(id))?;
        pid.status = status;
        Ok(pid.clone())
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether the store holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

#[async_trait]
impl IdentifierStore for InMemoryIdentifierStore {
    type Error = IdentifierError;

    async fn resolve(&self, pid_ref: &PidRef) -> Result<Option<Pid>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .by_ref
            .get(pid_ref)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn get(&self, id: PidId) -> Result<Option<Pid>, Self::Error> {
        Ok(self.inner.read().by_id.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[PidId]) -> Result<Vec<Pid>, Self::Error> {
        let inner = self.inner.read();
        Ok(ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
    }

    async fn redirect(&self, id: PidId, target: PidId) -> Result<Pid, Self::Error> {
        let mut inner = self.inner.write();
        if !inner.by_id.contains_key(&target) {
            return Err(IdentifierError::NotFound(target));
        }
        let pid = inner.by_id.get_mut(&id).ok_or(IdentifierError::NotFound(id))?;
        if matches!(pid.status, PidStatus::Deleted | PidStatus::New) {
            return Err(IdentifierError::InvalidStatus {
                id,
                status: pid.status,
                action: "redirect",
            });
        }
        pid.redirect = Some(target);
        Ok(pid.clone())
    }

    async fn register(&self, id: PidId) -> Result<Pid, Self::Error> {
        let mut inner = self.inner.write();
        let pid = inner.by_id.get_mut(&id).ok_or(IdentifierError::NotFound(id))?;
        match pid.status {
            PidStatus::New | PidStatus::Reserved | PidStatus::Registered => {
                pid.status = PidStatus::Registered;
                Ok(pid.clone())
            }
            status => Err(IdentifierError::InvalidStatus {
                id,
                status,
                action: "register",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_resolve() {
        let store = InMemoryIdentifierStore::new();
        let pid = store.create("recid", "1", PidStatus::Registered).unwrap();

        let resolved = store.resolve(&PidRef::new("recid", "1")).await.unwrap();
        assert_eq!(resolved, Some(pid.clone()));
        assert_eq!(store.get(pid.id).await.unwrap(), Some(pid));
        assert!(store.resolve(&PidRef::new("recid", "2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ref_rejected() {
        let store = InMemoryIdentifierStore::new();
        store.create("recid", "1", PidStatus::New).unwrap();
        assert!(matches!(
            store.create("recid", "1", PidStatus::New),
            Err(IdentifierError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_register_and_redirect() {
        let store = InMemoryIdentifierStore::new();
        let parent = store.create("recid", "p", PidStatus::Reserved).unwrap();
        let child = store.create("recid", "c", PidStatus::Registered).unwrap();

        let parent = store.register(parent.id).await.unwrap();
        assert_eq!(parent.status, PidStatus::Registered);

        let parent = store.redirect(parent.id, child.id).await.unwrap();
        assert_eq!(parent.redirect, Some(child.id));
    }

    #[tokio::test]
    async fn test_deleted_cannot_register() {
        let store = InMemoryIdentifierStore::new();
        let pid = store.create("recid", "1", PidStatus::Deleted).unwrap();
        assert!(matches!(
            store.register(pid.id).await,
            Err(IdentifierError::InvalidStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let store = InMemoryIdentifierStore::new();
        let a = store.create("recid", "a", PidStatus::New).unwrap();
        let b = store.create("recid", "b", PidStatus::New).unwrap();

        let pids = store.get_many(&[b.id, PidId::random(), a.id]).await.unwrap();
        assert_eq!(pids, vec![b, a]);
    }
}
