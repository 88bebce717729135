//! Client module for the coordination service
//!
//! Provides the composition root that wires one [`Session`] into:
//! - [`NodeRepository`] - node CRUD and queries
//! - [`ChangeNotifier`] - subtree watches and local caches
//! - [`LockFacade`] - distributed exclusive and read/write locks
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use coordkit::{Client, CoordConfig, CreateMode, MemoryEnsemble};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::builder(CoordConfig::default(), Arc::new(MemoryEnsemble::new()))
//!         .namespace("app")
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     client
//!         .repository()
//!         .create_node(CreateMode::Persistent, "/config/db", Some(b"postgres://db"))
//!         .await;
//!
//!     let updated = client
//!         .locks()
//!         .with_exclusive_lock("/locks/migrate", Duration::from_secs(5), || async { "migrated" })
//!         .await
//!         .unwrap();
//!     println!("{:?}", updated);
//!
//!     client.close().await.unwrap();
//! }
//! ```

mod builder;

pub use builder::*;


use std::sync::Arc;

use tracing::info;

use crate::backend::Connector;
use crate::ChangeNotifier;
use crate::CoordConfig;
use crate::LockFacade;
use crate::NodeRepository;
use crate::Outcome;
use crate::Result;
use crate::Session;

/// Main entry point for interacting with the coordination service
///
/// Cheap to clone; clones share the session and every component.
/// Created through the [`builder()`](Client::builder) method.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: CoordConfig,
    session: Session,
    repository: NodeRepository,
    notifier: ChangeNotifier,
    locks: LockFacade,
}

impl std::fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("session", &self.inner.session)
            .finish()
    }
}

impl Client {
    /// Create a configured client builder
    ///
    /// Chain configuration methods before calling
    /// [`build()`](ClientBuilder::build).
    pub fn builder(
        config: CoordConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientBuilder {
        ClientBuilder::new(config, connector)
    }

    pub fn repository(&self) -> &NodeRepository {
        &self.inner.repository
    }

    pub fn notifications(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    pub fn locks(&self) -> &LockFacade {
        &self.inner.locks
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn config(&self) -> &CoordConfig {
        &self.inner.config
    }

    /// Serves the read from a local cache covering `path` when it has an
    /// entry, otherwise reads from the service. Cached answers may be stale.
    pub async fn get_cached_node_data(
        &self,
        path: &str,
    ) -> Outcome<Vec<u8>> {
        match self.inner.notifier.cached_node_data(path) {
            Some(data) => Outcome::Ok(data),
            None => self.inner.repository.get_node_data(path).await,
        }
    }

    /// Stops watches and caches, then closes the session. Ephemeral nodes and
    /// held locks are released by the service.
    pub async fn close(&self) -> Result<()> {
        if self.inner.session.is_closed() {
            return Ok(());
        }
        self.inner.notifier.close().await;
        self.inner.session.close().await?;
        info!("coordination client closed");
        Ok(())
    }
}
