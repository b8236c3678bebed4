//! Error types for relation operations.

use crate::store::StoreError;
use crate::types::{PidId, PidRef};

/// Error returned by node and engine operations.
///
/// Every variant is a request-level failure. None of them leave partial
/// edge or position writes behind.
#[derive(Debug, thiserror::Error)]
pub enum RelationError {
    /// The `(parent, child, kind)` edge already exists.
    #[error("Relation already exists: {parent} -> {child} ({kind})")]
    Conflict {
        /// Parent identifier.
        parent: PidId,
        /// Child identifier.
        child: PidId,
        /// Relation kind.
        kind: String,
    },

    /// No `(parent, child, kind)` edge exists.
    #[error("No relation of kind {kind} between {parent} as parent and {child} as child")]
    NotFound {
        /// Parent identifier.
        parent: PidId,
        /// Child identifier.
        child: PidId,
        /// Relation kind.
        kind: String,
    },

    /// A cardinality bound of the kind would be exceeded.
    #[error("Cardinality exceeded for {kind}: {pid} already has {current} {side} (max {max})")]
    CardinalityExceeded {
        /// Relation kind.
        kind: String,
        /// Identifier whose bound is hit.
        pid: PidId,
        /// "children" or "parents".
        side: &'static str,
        /// Current count.
        current: usize,
        /// Configured bound.
        max: usize,
    },

    /// A versioning rule was violated.
    #[error("Versioning error: {0}")]
    VersioningState(String),

    /// Position ordering was requested on an unordered kind.
    #[error("Relation kind {0} is not ordered")]
    UnorderedKind(String),

    /// `one_or_none` matched more than one identifier.
    #[error("Expected at most one result for {kind} query on {pid}, found {found}")]
    MultipleResults {
        /// Relation kind.
        kind: String,
        /// Identifier the query started from.
        pid: PidId,
        /// Number of matches.
        found: usize,
    },

    /// Kind name is not registered.
    #[error("Unknown relation kind: {0}")]
    UnknownKind(String),

    /// A type+value reference did not resolve.
    #[error("Persistent identifier not found: {0}")]
    PidNotFound(PidRef),

    /// An identifier id did not resolve.
    #[error("Persistent identifier not found: {0}")]
    PidIdNotFound(PidId),

    /// Identifier store failure.
    #[error("Identifier store error: {0}")]
    Identifier(String),

    /// Relation store failure.
    #[error("Relation store error: {0}")]
    Store(StoreError),
}

impl RelationError {
    /// Wrap an identifier store error.
    pub fn from_identifiers<E: std::error::Error>(e: E) -> Self {
        Self::Identifier(e.to_string())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Store(_))
    }
}

impl From<StoreError> for RelationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { parent, child, kind } => Self::Conflict { parent, child, kind },
            StoreError::NotFound { parent, child, kind } => Self::NotFound { parent, child, kind },
            other => Self::Store(other),
        }
    }
}
