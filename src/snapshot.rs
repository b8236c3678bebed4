//! Read-only relation views for serialization.
//!
//! A `RelationsSnapshot` collects every relation touching one identifier,
//! keyed by kind name, in a shape downstream serializers can dump as is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::Relations;
use crate::error::RelationError;
use crate::store::{IdentifierStore, RelationStore};
use crate::types::{Pid, PidHandle, PidId, PidRef, Relation};
use crate::PID_RELATIONS_SCHEMA_VERSION;

/// One relation as seen from the snapshot's identifier.
///
/// Position fields (`index`, `next`, `previous`, `is_last`, `is_first`)
/// are only set when the identifier is the child of an ordered relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationView {
    /// Kind name.
    pub kind: String,
    /// Whether the kind is ordered.
    pub is_ordered: bool,
    /// Parent of the relation.
    pub parent: Option<PidRef>,
    /// Children of the parent. Versioning kinds list published versions.
    pub children: Vec<PidRef>,
    /// The identifier is the parent.
    pub is_parent: bool,
    /// The identifier is the child.
    pub is_child: bool,
    /// Position of the identifier among its siblings.
    pub index: Option<u32>,
    /// Sibling with the nearest greater position.
    pub next: Option<PidRef>,
    /// Sibling with the nearest lesser position.
    pub previous: Option<PidRef>,
    /// The identifier holds the highest position.
    pub is_last: Option<bool>,
    /// The identifier holds the lowest position.
    pub is_first: Option<bool>,
}

/// Every relation touching an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationsSnapshot {
    /// The identifier.
    pub pid: PidRef,
    /// Views by kind name.
    pub relations: BTreeMap<String, Vec<RelationView>>,
    /// Fingerprint of the kind registry the views were built with.
    pub registry_fingerprint: String,
    /// Schema version of the view types.
    pub schema_version: String,
}

impl RelationsSnapshot {
    /// Total number of views.
    pub fn len(&self) -> usize {
        self.relations.values().map(Vec::len).sum()
    }

    /// Whether the identifier has no relations.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Views of one kind.
    pub fn get(&self, kind: &str) -> &[RelationView] {
        self.relations.get(kind).map_or(&[], Vec::as_slice)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<R: RelationStore, I: IdentifierStore> Relations<R, I> {
    /// Build the views of every relation touching `pid`.
    ///
    /// Produces one view per parent of `pid` and, for each kind where `pid`
    /// has children, one view with `pid` as parent. Edges of kinds missing
    /// from the registry are skipped.
    pub async fn relations_snapshot(&self, pid: impl Into<PidHandle>) -> Result<RelationsSnapshot, RelationError> {
        let pid = self.resolve(pid).await?;
        let edges = self.relation_store().relations_of(pid.id).await?;

        let mut relations: BTreeMap<String, Vec<RelationView>> = BTreeMap::new();
        let mut parent_kinds: Vec<String> = Vec::new();
        for edge in &edges {
            if self.kinds().get(&edge.kind).is_none() {
                tracing::warn!(kind = %edge.kind, pid = %pid.id, "Skipping relation of unregistered kind");
                continue;
            }
            if edge.parent == pid.id {
                if !parent_kinds.contains(&edge.kind) {
                    parent_kinds.push(edge.kind.clone());
                }
                continue;
            }
            let view = self.child_view(&pid, edge).await?;
            relations.entry(edge.kind.clone()).or_default().push(view);
        }
        for kind in parent_kinds {
            let view = self.parent_view(&pid, &kind).await?;
            relations.entry(kind).or_default().push(view);
        }

        tracing::debug!(
            pid = %pid.id,
            edge_count = edges.len(),
            related_count = related_ids(&edges, pid.id).len(),
            kind_count = relations.len(),
            "Built relations snapshot"
        );
        Ok(RelationsSnapshot {
            pid: pid.to_ref(),
            relations,
            registry_fingerprint: self.kinds().fingerprint().to_string(),
            schema_version: PID_RELATIONS_SCHEMA_VERSION.to_string(),
        })
    }

    async fn parent_view(&self, pid: &Pid, kind: &str) -> Result<RelationView, RelationError> {
        let node = self.node(pid.clone(), kind).await?;
        Ok(RelationView {
            kind: kind.to_string(),
            is_ordered: node.kind().ordered,
            parent: Some(pid.to_ref()),
            children: refs(node.children().all().await?),
            is_parent: true,
            is_child: false,
            index: None,
            next: None,
            previous: None,
            is_last: None,
            is_first: None,
        })
    }

    async fn child_view(&self, pid: &Pid, edge: &Relation) -> Result<RelationView, RelationError> {
        let parent = self.pid(edge.parent).await?;
        let node = self.node(parent.clone(), &edge.kind).await?;
        let mut view = RelationView {
            kind: edge.kind.clone(),
            is_ordered: node.kind().ordered,
            parent: Some(parent.to_ref()),
            children: refs(node.children().all().await?),
            is_parent: false,
            is_child: true,
            index: None,
            next: None,
            previous: None,
            is_last: None,
            is_first: None,
        };
        if let (Some(ordered), Some(_)) = (node.as_ordered(), edge.position) {
            view.index = ordered.index_of(pid.clone()).await?;
            view.next = ordered.next_of(pid.clone()).await?.map(|p| p.to_ref());
            view.previous = ordered.previous_of(pid.clone()).await?.map(|p| p.to_ref());
            view.is_last = Some(ordered.is_last_child(pid.clone()).await?);
            view.is_first = Some(ordered.is_first_child(pid.clone()).await?);
        }
        Ok(view)
    }
}

fn refs(pids: Vec<Pid>) -> Vec<PidRef> {
    pids.iter().map(Pid::to_ref).collect()
}

/// Ids at the far end of `edges` as seen from `pid`, deduplicated.
pub fn related_ids(edges: &[Relation], pid: PidId) -> Vec<PidId> {
    let mut ids: Vec<PidId> = edges
        .iter()
        .map(|r| if r.parent == pid { r.child } else { r.parent })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}
