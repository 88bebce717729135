//! Coordination service boundary.
//!
//! Everything above this module talks to the service through [`Coordinator`],
//! a connected session handle speaking absolute paths, and obtains one from a
//! [`Connector`]. `ZooKeeperConnector` (feature `zookeeper`, on by default)
//! talks to a real ensemble; [`MemoryEnsemble`] is the in-process double used
//! for embedded deployments and tests.

mod memory;
mod types;
#[cfg(feature = "zookeeper")]
mod zookeeper;

pub use memory::*;
pub use types::*;
#[cfg(feature = "zookeeper")]
pub use zookeeper::*;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// A live session with the coordination service.
///
/// Paths are absolute service paths. Logical failures surface as
/// [`crate::CoordinationError`], transport failures as
/// [`crate::ConnectionError`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    fn session_id(&self) -> SessionId;

    /// Attaches credentials to the session, e.g. `("digest", "user:secret")`.
    async fn add_auth(
        &self,
        scheme: &str,
        auth: &[u8],
    ) -> Result<()>;

    /// Creates a node and returns its actual path, which differs from `path`
    /// for sequential modes.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String>;

    /// Deletes a childless node; `None` skips the version check.
    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()>;

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<Stat>;

    async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)>;

    async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>>;

    /// Child names (not paths), in no particular order.
    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>>;

    /// Brings this session's view of `path` up to date with the leader.
    async fn sync(
        &self,
        path: &str,
    ) -> Result<()>;

    async fn add_watch(
        &self,
        path: &str,
        mode: AddWatchMode,
    ) -> Result<WatchRegistration>;

    async fn remove_watch(
        &self,
        id: WatchId,
    ) -> Result<()>;

    /// Ends the session; ephemeral nodes it owns are removed.
    async fn close(&self) -> Result<()>;
}

/// Opens sessions against a server list.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: std::time::Duration,
    ) -> Result<Arc<dyn Coordinator>>;
}
