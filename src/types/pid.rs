//! Persistent identifier handles.
//!
//! Identifiers are owned by an external identifier store. The relation
//! engine only reads their identity and status and asks the store to
//! redirect or register them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use std::fmt;

/// Store identity of a persistent identifier.
///
/// Wraps a UUID and implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PidId(Uuid);

impl PidId {
    /// Create a new PidId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Generate a fresh random PidId.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PidId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Lifecycle status of a persistent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PidStatus {
    /// Freshly created, not yet reserved.
    New,
    /// Reserved but not yet published.
    Reserved,
    /// Published and resolvable.
    Registered,
    /// Resolves to another identifier.
    Redirected,
    /// Tombstoned.
    Deleted,
}

impl PidStatus {
    /// Parse a status from its name or its single-letter storage code.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "N" | "NEW" => Some(Self::New),
            "K" | "RESERVED" => Some(Self::Reserved),
            "R" | "REGISTERED" => Some(Self::Registered),
            "M" | "REDIRECTED" => Some(Self::Redirected),
            "D" | "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Single-letter storage code.
    pub fn code(&self) -> char {
        match self {
            Self::New => 'N',
            Self::Reserved => 'K',
            Self::Registered => 'R',
            Self::Redirected => 'M',
            Self::Deleted => 'D',
        }
    }
}

impl fmt::Display for PidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Reserved => write!(f, "RESERVED"),
            Self::Registered => write!(f, "REGISTERED"),
            Self::Redirected => write!(f, "REDIRECTED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Lightweight reference to an identifier by type and value.
///
/// This is what a fetcher returns before the identifier is looked up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PidRef {
    /// Identifier scheme, e.g. `recid` or `doi`.
    pub pid_type: String,
    /// Identifier value within the scheme.
    pub pid_value: String,
}

impl PidRef {
    /// Create a reference.
    pub fn new(pid_type: impl Into<String>, pid_value: impl Into<String>) -> Self {
        Self {
            pid_type: pid_type.into(),
            pid_value: pid_value.into(),
        }
    }
}

impl fmt::Display for PidRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid_type, self.pid_value)
    }
}

/// Hydrated identifier as held by the identifier store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pid {
    /// Store identity.
    pub id: PidId,
    /// Identifier scheme.
    pub pid_type: String,
    /// Identifier value.
    pub pid_value: String,
    /// Current status.
    pub status: PidStatus,
    /// Redirect target, if any.
    pub redirect: Option<PidId>,
}

impl Pid {
    /// Create a new identifier without a redirect.
    pub fn new(
        id: PidId,
        pid_type: impl Into<String>,
        pid_value: impl Into<String>,
        status: PidStatus,
    ) -> Self {
        Self {
            id,
            pid_type: pid_type.into(),
            pid_value: pid_value.into(),
            status,
            redirect: None,
        }
    }

    /// The type+value reference of this identifier.
    pub fn to_ref(&self) -> PidRef {
        PidRef::new(self.pid_type.clone(), self.pid_value.clone())
    }

    /// Check the status.
    pub fn is(&self, status: PidStatus) -> bool {
        self.status == status
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.pid_type, self.pid_value, self.status)
    }
}

/// An identifier as handed to the engine: hydrated or still to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidHandle {
    /// Already loaded from the identifier store.
    Resolved(Pid),
    /// Type+value reference, resolved on use.
    Fetched(PidRef),
}

impl From<Pid> for PidHandle {
    fn from(pid: Pid) -> Self {
        Self::Resolved(pid)
    }
}

impl From<&Pid> for PidHandle {
    fn from(pid: &Pid) -> Self {
        Self::Resolved(pid.clone())
    }
}

impl From<PidRef> for PidHandle {
    fn from(pid_ref: PidRef) -> Self {
        Self::Fetched(pid_ref)
    }
}

impl From<&PidRef> for PidHandle {
    fn from(pid_ref: &PidRef) -> Self {
        Self::Fetched(pid_ref.clone())
    }
}
