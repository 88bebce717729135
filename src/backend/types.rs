use std::fmt;

use tokio::sync::mpsc;

pub type SessionId = u64;
pub type WatchId = u64;

/// Lifetime and naming behaviour of a created node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Durable, removed only by an explicit delete
    Persistent,
    /// Durable, the service appends a monotonically increasing suffix
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    /// Ephemeral with a sequential suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::PersistentSequential | CreateMode::EphemeralSequential)
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }
}

/// Node metadata maintained by the coordination service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Transaction id that created the node
    pub czxid: i64,
    /// Transaction id of the last data change
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    /// Number of data changes
    pub version: i32,
    /// Number of child changes
    pub cversion: i32,
    /// Owning session for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: SessionId,
    pub data_length: i32,
    pub num_children: i32,
}

pub mod perms {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const CREATE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ADMIN: u32 = 1 << 4;
    pub const ALL: u32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// Authenticated identity, `scheme:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    pub scheme: String,
    pub id: String,
}

impl Id {
    pub fn new(
        scheme: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    pub fn anyone() -> Self {
        Self::new("world", "anyone")
    }

    /// Placeholder replaced by the creating session's identities
    pub fn creator() -> Self {
        Self::new("auth", "")
    }
}

impl fmt::Display for Id {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: u32,
    pub id: Id,
}

impl Acl {
    /// Everyone may do everything
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl {
            perms: perms::ALL,
            id: Id::anyone(),
        }]
    }

    /// Only the creating identity may access the node
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl {
            perms: perms::ALL,
            id: Id::creator(),
        }]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddWatchMode {
    /// Events for the node itself and its direct children list
    Persistent,
    /// Events for the node and every descendant, without child-list events
    PersistentRecursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    /// Absolute service path (namespace included)
    pub path: String,
}

/// A registered persistent watch and the stream of its events.
///
/// The stream ends when the watch is removed or the session closes.
#[derive(Debug)]
pub struct WatchRegistration {
    pub id: WatchId,
    pub events: mpsc::UnboundedReceiver<WatchedEvent>,
}
