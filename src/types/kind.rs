//! Relation kinds and their configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node variant that interprets a relation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Plain parent/child links, no positions.
    #[default]
    Unordered,
    /// Children carry dense positions.
    Ordered,
    /// Ordered children with a draft slot and parent redirect.
    Versioning,
}

impl NodeType {
    /// Parse node type from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unordered" | "plain" => Some(Self::Unordered),
            "ordered" => Some(Self::Ordered),
            "versioning" => Some(Self::Versioning),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unordered => write!(f, "unordered"),
            Self::Ordered => write!(f, "ordered"),
            Self::Versioning => write!(f, "versioning"),
        }
    }
}

/// Configuration of one relation kind.
///
/// Built once at startup by the registry and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKind {
    /// Stable name, also the value persisted on every edge.
    pub name: String,
    /// Whether children carry positions.
    pub ordered: bool,
    /// Maximum number of children a parent may have.
    pub max_children: Option<usize>,
    /// Maximum number of parents a child may have.
    pub max_parents: Option<usize>,
    /// Node variant used to interpret this kind.
    pub node: NodeType,
}

impl RelationKind {
    /// Unordered kind without cardinality limits.
    pub fn unordered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordered: false,
            max_children: None,
            max_parents: None,
            node: NodeType::Unordered,
        }
    }

    /// Ordered kind without cardinality limits.
    pub fn ordered(name: impl Into<String>) -> Self {
        Self {
            ordered: true,
            node: NodeType::Ordered,
            ..Self::unordered(name)
        }
    }

    /// Versioning kind: ordered, each version has a single parent.
    pub fn versioning(name: impl Into<String>) -> Self {
        Self {
            ordered: true,
            max_parents: Some(1),
            node: NodeType::Versioning,
            ..Self::unordered(name)
        }
    }

    /// Set the children bound.
    pub fn with_max_children(mut self, max: usize) -> Self {
        self.max_children = Some(max);
        self
    }

    /// Set the parents bound.
    pub fn with_max_parents(mut self, max: usize) -> Self {
        self.max_parents = Some(max);
        self
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Where to place a new child among its ordered siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertAt {
    /// Target index, clamped to the sibling list.
    Index(usize),
    /// After every positioned sibling.
    #[default]
    Last,
    /// No position: the edge does not take part in ordering.
    Unpositioned,
}

/// Sort direction for position-ordered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Lowest position first.
    Asc,
    /// Highest position first.
    Desc,
}
