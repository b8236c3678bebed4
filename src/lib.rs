//! # pid-relations
//!
//! Typed, directed relations between persistent identifiers.
//!
//! The engine answers one question:
//!
//! > Given an identifier and a relation kind, what are its parents and
//! > children, and in which order?
//!
//! ## Core Contract
//!
//! 1. An edge is a `(parent, child, kind)` triple; the triple is unique
//! 2. Ordered kinds keep sibling positions dense (`0..n-1`) after every
//!    insert and every reindexing remove
//! 3. Kinds may bound how many parents or children an identifier has
//! 4. The versioning kind keeps at most one draft per parent and points
//!    the parent at its latest published version
//!
//! ## Architecture
//!
//! ```text
//! PidHandle → Relations → Node (Unordered | Ordered | Versioning)
//!                ↓                     ↓
//!        RelationKindRegistry    RelationTxn (one sibling group)
//!                                      ↓
//!                     RelationStore (Postgres or Memory)
//!                     IdentifierStore (external)
//! ```
//!
//! ## Consistency Guarantees
//!
//! - Every mutation runs in one transaction and either fully applies or
//!   leaves no trace
//! - Versioning redirects are written after the edges commit, derived from
//!   committed state
//! - Writers to the same sibling group are serialized; disjoint groups
//!   proceed concurrently
//! - Edge ordering is canonical (position, then parent, kind, child)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod store;
pub mod registry;
pub mod engine;
pub mod node;
pub mod snapshot;
pub mod telemetry;

// Re-exports
pub use types::{
    InsertAt, NodeType, Order, Pid, PidHandle, PidId, PidRef, PidStatus, Relation,
    RelationKind, SiblingGroup,
};
pub use error::RelationError;
pub use store::{
    Direction, IdentifierError, IdentifierStore, InMemoryIdentifierStore, InMemoryRelationStore,
    InMemoryTxn, RelationStore, RelationTxn, StoreError,
};
#[cfg(feature = "postgres")]
pub use store::{PostgresConfig, PostgresRelationStore, PostgresTxn};
pub use registry::{
    KindConfig, RegistryError, RelationKindRegistry, COLLECTION_KIND, KINDS_FILE_ENV,
    RECORD_DRAFT_KIND, VERSION_KIND,
};
pub use engine::Relations;
pub use node::{Node, OrderedNode, PidNode, PidQuery, Side, VersioningNode};
pub use snapshot::{RelationView, RelationsSnapshot};
pub use telemetry::init_tracing;

/// Schema version for serialized relation views.
/// Increment on breaking changes to any serialized type.
pub const PID_RELATIONS_SCHEMA_VERSION: &str = "1.0.0";
