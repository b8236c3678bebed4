//! Core types for the relation engine.

pub mod pid;
pub mod kind;
pub mod relation;

pub use pid::{PidId, PidStatus, PidRef, Pid, PidHandle};
pub use kind::{RelationKind, NodeType, InsertAt, Order};
pub use relation::{Relation, SiblingGroup};
