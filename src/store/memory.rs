//! In-memory relation store.
//!
//! Committed edges live behind a `parking_lot::RwLock` and are only ever
//! replaced a whole sibling group at a time, so readers see a group either
//! before or after a transaction, never in between. Writers serialize on
//! per-group (and, for bounded kinds, per-child) async locks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::types::{Order, PidId, Relation, SiblingGroup};
use super::{Direction, RelationStore, RelationTxn, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Group(SiblingGroup),
    Child(PidId, String),
}

/// Named async locks, created on first use and dropped once nobody holds
/// or waits for them.
#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    async fn acquire(table: &Arc<Self>, key: LockKey) -> LockGuard {
        let lock = {
            let mut locks = table.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        LockGuard {
            key,
            table: Arc::clone(table),
            guard: Some(guard),
        }
    }

    /// Forget `key` if the table holds the only reference. Clones are only
    /// taken under the table mutex, so a waiter cannot slip in between.
    fn release(&self, key: &LockKey) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// A held entry of a [`LockTable`].
struct LockGuard {
    key: LockKey,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

#[derive(Debug, Default)]
struct Tables {
    /// Sibling group -> child -> edge.
    groups: BTreeMap<SiblingGroup, BTreeMap<PidId, Relation>>,
    /// (child, kind) -> parents.
    parents: BTreeMap<(PidId, String), BTreeSet<PidId>>,
}

impl Tables {
    fn group(&self, parent: PidId, kind: &str) -> Option<&BTreeMap<PidId, Relation>> {
        self.groups.get(&SiblingGroup::new(parent, kind))
    }

    fn positioned(&self, parent: PidId, kind: &str) -> impl Iterator<Item = (u32, &Relation)> {
        self.group(parent, kind)
            .into_iter()
            .flat_map(|edges| edges.values())
            .filter_map(|r| r.position.map(|p| (p, r)))
    }
}

/// In-memory relation store for tests and embedded use.
///
/// Cheap to clone; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRelationStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
}

impl InMemoryRelationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed edges.
    pub fn num_relations(&self) -> usize {
        self.tables.read().groups.values().map(BTreeMap::len).sum()
    }
}

/// Transaction over one sibling group of an [`InMemoryRelationStore`].
///
/// Holds a private working copy of the group; commit swaps it in.
pub struct InMemoryTxn {
    group: SiblingGroup,
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
    _group_guard: LockGuard,
    child_guards: BTreeMap<PidId, LockGuard>,
    working: BTreeMap<PidId, Relation>,
    created: BTreeSet<PidId>,
    deleted: BTreeSet<PidId>,
}

impl InMemoryTxn {
    fn conflict(&self, child: PidId) -> StoreError {
        StoreError::Conflict {
            parent: self.group.parent,
            child,
            kind: self.group.kind.clone(),
        }
    }

    fn not_found(&self, child: PidId) -> StoreError {
        StoreError::NotFound {
            parent: self.group.parent,
            child,
            kind: self.group.kind.clone(),
        }
    }
}

#[async_trait]
impl RelationTxn for InMemoryTxn {
    fn group(&self) -> &SiblingGroup {
        &self.group
    }

    async fn siblings(&mut self) -> Result<Vec<Relation>, StoreError> {
        let mut siblings: Vec<_> = self.working.values().cloned().collect();
        siblings.sort();
        Ok(siblings)
    }

    async fn child_count(&mut self) -> Result<usize, StoreError> {
        Ok(self.working.len())
    }

    async fn lock_child(&mut self, child: PidId) -> Result<(), StoreError> {
        if !self.child_guards.contains_key(&child) {
            let guard = LockTable::acquire(&self.locks, LockKey::Child(child, self.group.kind.clone())).await;
            self.child_guards.insert(child, guard);
        }
        Ok(())
    }

    async fn parent_count(&mut self, child: PidId) -> Result<usize, StoreError> {
        let others = self
            .tables
            .read()
            .parents
            .get(&(child, self.group.kind.clone()))
            .map(|parents| parents.iter().filter(|p| **p != self.group.parent).count())
            .unwrap_or(0);
        Ok(others + usize::from(self.working.contains_key(&child)))
    }

    async fn create(&mut self, child: PidId, position: Option<u32>) -> Result<Relation, StoreError> {
        if self.working.contains_key(&child) {
            return Err(self.conflict(child));
        }
        let relation = Relation::new(self.group.parent, child, self.group.kind.clone(), position);
        self.working.insert(child, relation.clone());
        self.created.insert(child);
        Ok(relation)
    }

    async fn delete(&mut self, child: PidId) -> Result<Relation, StoreError> {
        let relation = self.working.remove(&child).ok_or_else(|| self.not_found(child))?;
        if !self.created.remove(&child) {
            self.deleted.insert(child);
        }
        Ok(relation)
    }

    async fn set_position(&mut self, child: PidId, position: Option<u32>) -> Result<(), StoreError> {
        let not_found = self.not_found(child);
        let relation = self.working.get_mut(&child).ok_or(not_found)?;
        relation.position = position;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let base = tables.groups.get(&self.group).cloned().unwrap_or_default();

        // Uniqueness is checked against committed state, not just the
        // snapshot taken at begin.
        if let Some(child) = self
            .created
            .iter()
            .find(|c| base.contains_key(*c) && !self.deleted.contains(*c))
        {
            return Err(self.conflict(*child));
        }

        for child in base.keys().filter(|c| !self.working.contains_key(*c)) {
            let key = (*child, self.group.kind.clone());
            if let Some(parents) = tables.parents.get_mut(&key) {
                parents.remove(&self.group.parent);
                if parents.is_empty() {
                    tables.parents.remove(&key);
                }
            }
        }
        for child in self.working.keys().filter(|c| !base.contains_key(*c)) {
            tables
                .parents
                .entry((*child, self.group.kind.clone()))
                .or_default()
                .insert(self.group.parent);
        }

        if self.working.is_empty() {
            tables.groups.remove(&self.group);
        } else {
            tables.groups.insert(self.group.clone(), self.working);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        tracing::debug!(
            parent = %self.group.parent,
            kind = %self.group.kind,
            discarded_creates = self.created.len(),
            discarded_deletes = self.deleted.len(),
            "Rolling back in-memory relation transaction"
        );
        Ok(())
    }
}

#[async_trait]
impl RelationStore for InMemoryRelationStore {
    type Txn = InMemoryTxn;

    async fn begin(&self, group: &SiblingGroup) -> Result<Self::Txn, StoreError> {
        let guard = LockTable::acquire(&self.locks, LockKey::Group(group.clone())).await;
        let working = self.tables.read().groups.get(group).cloned().unwrap_or_default();
        Ok(InMemoryTxn {
            group: group.clone(),
            tables: Arc::clone(&self.tables),
            locks: Arc::clone(&self.locks),
            _group_guard: guard,
            child_guards: BTreeMap::new(),
            working,
            created: BTreeSet::new(),
            deleted: BTreeSet::new(),
        })
    }

    async fn get(&self, parent: PidId, child: PidId, kind: &str) -> Result<Option<Relation>, StoreError> {
        Ok(self
            .tables
            .read()
            .group(parent, kind)
            .and_then(|edges| edges.get(&child))
            .cloned())
    }

    async fn children(&self, parent: PidId, kind: &str, order: Option<Order>) -> Result<Vec<Relation>, StoreError> {
        let tables = self.tables.read();
        let mut result: Vec<Relation> = match order {
            Some(_) => tables.positioned(parent, kind).map(|(_, r)| r.clone()).collect(),
            None => tables
                .group(parent, kind)
                .map(|edges| edges.values().cloned().collect())
                .unwrap_or_default(),
        };
        result.sort();
        if order == Some(Order::Desc) {
            result.reverse();
        }
        Ok(result)
    }

    async fn parents(&self, child: PidId, kind: &str) -> Result<Vec<Relation>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .parents
            .get(&(child, kind.to_string()))
            .map(|parents| {
                parents
                    .iter()
                    .filter_map(|p| tables.group(*p, kind).and_then(|edges| edges.get(&child)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_children(&self, parent: PidId, kind: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .group(parent, kind)
            .is_some_and(|edges| !edges.is_empty()))
    }

    async fn has_parents(&self, child: PidId, kind: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .parents
            .get(&(child, kind.to_string()))
            .is_some_and(|parents| !parents.is_empty()))
    }

    async fn neighbor(
        &self,
        parent: PidId,
        kind: &str,
        position: u32,
        direction: Direction,
    ) -> Result<Option<Relation>, StoreError> {
        let tables = self.tables.read();
        let candidates = tables.positioned(parent, kind);
        let found = match direction {
            Direction::Next => candidates.filter(|(p, _)| *p > position).min_by_key(|(p, _)| *p),
            Direction::Previous => candidates.filter(|(p, _)| *p < position).max_by_key(|(p, _)| *p),
        };
        Ok(found.map(|(_, r)| r.clone()))
    }

    async fn boundary(&self, parent: PidId, kind: &str, order: Order) -> Result<Option<Relation>, StoreError> {
        let tables = self.tables.read();
        let candidates = tables.positioned(parent, kind);
        let found = match order {
            Order::Asc => candidates.min_by_key(|(p, _)| *p),
            Order::Desc => candidates.max_by_key(|(p, _)| *p),
        };
        Ok(found.map(|(_, r)| r.clone()))
    }

    async fn relations_of(&self, pid: PidId) -> Result<Vec<Relation>, StoreError> {
        let tables = self.tables.read();
        let mut result: Vec<Relation> = tables
            .groups
            .iter()
            .flat_map(|(group, edges)| {
                edges
                    .values()
                    .filter(move |r| group.parent == pid || r.child == pid)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.cmp(b)));
        Ok(result)
    }
}
