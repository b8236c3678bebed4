//! Relation kind registry.
//!
//! Maps kind names to their configuration. The registry is built once at
//! startup and shared read-only (`Arc<RelationKindRegistry>`) with every
//! component that needs kind lookups.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::error::RelationError;
use crate::types::{NodeType, RelationKind};

/// Name of the version lineage kind.
pub const VERSION_KIND: &str = "version";

/// Name of the collection membership kind.
pub const COLLECTION_KIND: &str = "collection";

/// Name of the record/draft link kind.
pub const RECORD_DRAFT_KIND: &str = "record_draft";

/// Environment variable pointing at a JSON kinds file.
pub const KINDS_FILE_ENV: &str = "PIDRELATIONS_KINDS_FILE";

/// Error loading a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Could not read the configuration file.
    #[error("Failed to read relation kinds file: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration is not valid JSON for the expected shape.
    #[error("Invalid relation kinds JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration is well-formed but inconsistent.
    #[error("Invalid relation kind {name}: {reason}")]
    Invalid {
        /// Offending kind.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Per-kind entry of the JSON configuration.
///
/// ```json
/// { "version": { "ordered": true, "max_parents": 1, "node": "versioning" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    /// Whether children carry positions.
    #[serde(default)]
    pub ordered: bool,
    /// Children bound.
    #[serde(default)]
    pub max_children: Option<usize>,
    /// Parents bound.
    #[serde(default)]
    pub max_parents: Option<usize>,
    /// Node variant; defaults to `ordered` or `unordered` from the flag.
    #[serde(default)]
    pub node: Option<NodeType>,
}

impl KindConfig {
    fn into_kind(self, name: String) -> RelationKind {
        let node = self.node.unwrap_or(if self.ordered {
            NodeType::Ordered
        } else {
            NodeType::Unordered
        });
        RelationKind {
            name,
            ordered: self.ordered,
            max_children: self.max_children,
            max_parents: self.max_parents,
            node,
        }
    }
}

/// Immutable registry of relation kinds.
///
/// Carries a fingerprint that identifies the configuration; two processes
/// with the same fingerprint interpret stored edges the same way.
#[derive(Debug, Clone)]
pub struct RelationKindRegistry {
    kinds: BTreeMap<String, RelationKind>,
    fingerprint: String,
}

impl RelationKindRegistry {
    /// Build a registry from kinds, validating each.
    pub fn new(kinds: impl IntoIterator<Item = RelationKind>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for kind in kinds {
            validate(&kind)?;
            if map.contains_key(&kind.name) {
                return Err(RegistryError::Invalid {
                    name: kind.name,
                    reason: "declared twice".to_string(),
                });
            }
            map.insert(kind.name.clone(), kind);
        }
        let fingerprint = fingerprint(&map);
        Ok(Self { kinds: map, fingerprint })
    }

    /// The default kinds: version lineage, collections, record drafts.
    pub fn with_defaults() -> Self {
        let kinds: BTreeMap<_, _> = default_kinds()
            .into_iter()
            .map(|k| (k.name.clone(), k))
            .collect();
        let fingerprint = fingerprint(&kinds);
        Self { kinds, fingerprint }
    }

    /// Parse a registry from a JSON object keyed by kind name.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let config: BTreeMap<String, KindConfig> = serde_json::from_str(json)?;
        Self::new(config.into_iter().map(|(name, cfg)| cfg.into_kind(name)))
    }

    /// Load a registry from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load from `PIDRELATIONS_KINDS_FILE`, or fall back to the defaults.
    pub fn from_env() -> Result<Self, RegistryError> {
        let registry = match std::env::var(KINDS_FILE_ENV) {
            Ok(path) if !path.is_empty() => {
                tracing::info!(path = %path, "Loading relation kinds from file");
                Self::from_file(path)?
            }
            _ => Self::with_defaults(),
        };
        tracing::info!(
            kind_count = registry.len(),
            registry_fingerprint = %registry.fingerprint(),
            "Relation kind registry initialized"
        );
        Ok(registry)
    }

    /// Look up a kind.
    pub fn get(&self, name: &str) -> Option<&RelationKind> {
        self.kinds.get(name)
    }

    /// Look up a kind, failing with [`RelationError::UnknownKind`].
    pub fn resolve(&self, name: &str) -> Result<&RelationKind, RelationError> {
        self.get(name)
            .ok_or_else(|| RelationError::UnknownKind(name.to_string()))
    }

    /// The first kind interpreted by the versioning node, if any.
    pub fn versioning_kind(&self) -> Option<&RelationKind> {
        self.kinds.values().find(|k| k.node == NodeType::Versioning)
    }

    /// All kinds, by name.
    pub fn kinds(&self) -> impl Iterator<Item = &RelationKind> {
        self.kinds.values()
    }

    /// Registry fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Number of kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for RelationKindRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_kinds() -> Vec<RelationKind> {
    vec![
        RelationKind::versioning(VERSION_KIND),
        RelationKind::unordered(COLLECTION_KIND),
        RelationKind::unordered(RECORD_DRAFT_KIND)
            .with_max_parents(1)
            .with_max_children(1),
    ]
}

fn validate(kind: &RelationKind) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::Invalid {
        name: kind.name.clone(),
        reason: reason.to_string(),
    };
    if kind.name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if kind.max_children == Some(0) || kind.max_parents == Some(0) {
        return Err(invalid("cardinality bounds must be at least 1"));
    }
    match (kind.node, kind.ordered) {
        (NodeType::Ordered | NodeType::Versioning, false) => {
            Err(invalid("ordered and versioning nodes need an ordered kind"))
        }
        (NodeType::Unordered, true) => Err(invalid("unordered node on an ordered kind")),
        _ => Ok(()),
    }
}

fn fingerprint(kinds: &BTreeMap<String, RelationKind>) -> String {
    let mut hasher = Xxh64::new(0);
    for kind in kinds.values() {
        hasher.write(kind.name.as_bytes());
        hasher.write_u8(u8::from(kind.ordered));
        hasher.write_u64(kind.max_children.map_or(0, |n| n as u64));
        hasher.write_u64(kind.max_parents.map_or(0, |n| n as u64));
        hasher.write(kind.node.to_string().as_bytes());
    }
    format!("{:016x}", hasher.finish())
}
