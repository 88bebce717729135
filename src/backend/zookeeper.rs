//! ZooKeeper ensemble backend.
//!
//! Adapts an async [`zookeeper_client::Client`] to [`Coordinator`]. Paths are
//! passed through untouched (namespacing happens in the session), so no
//! chroot is configured on the underlying client. Persistent watches are
//! pumped into the unbounded channels of [`WatchRegistration`].

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use zookeeper_client as zk;

use super::Acl;
use super::AddWatchMode;
use super::Connector;
use super::Coordinator;
use super::CreateMode;
use super::EventType;
use super::SessionId;
use super::Stat;
use super::WatchId;
use super::WatchRegistration;
use super::WatchedEvent;
use crate::utils::async_task::spawn_task;
use crate::ConnectionError;
use crate::CoordinationError;
use crate::Error;
use crate::Result;

/// Opens sessions against a ZooKeeper ensemble.
#[derive(Debug, Clone, Default)]
pub struct ZooKeeperConnector;

impl ZooKeeperConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for ZooKeeperConnector {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<Arc<dyn Coordinator>> {
        if servers.is_empty() {
            return Err(ConnectionError::NoServers.into());
        }
        let cluster = servers.join(",");
        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connect(&cluster)
            .await
            .map_err(|e| map_error(e, &cluster, None))?;

        let id = client.session_id().0 as SessionId;
        info!(cluster = %cluster, session = id, "zookeeper session opened");
        Ok(Arc::new(ZooKeeperSession {
            id,
            client: Mutex::new(Some(client)),
            watches: DashMap::new(),
            next_watch: AtomicU64::new(1),
        }))
    }
}

/// One ZooKeeper session.
pub struct ZooKeeperSession {
    id: SessionId,
    /// `None` once closed; dropping the last client handle ends the session
    client: Mutex<Option<zk::Client>>,
    watches: DashMap<WatchId, CancellationToken>,
    next_watch: AtomicU64,
}

impl ZooKeeperSession {
    fn client(&self) -> Result<zk::Client> {
        self.client.lock().clone().ok_or(Error::SessionClosed)
    }
}

#[async_trait]
impl Coordinator for ZooKeeperSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn add_auth(
        &self,
        scheme: &str,
        auth: &[u8],
    ) -> Result<()> {
        self.client()?
            .auth(scheme.to_string(), auth.to_vec())
            .await
            .map_err(|e| map_error(e, "/", None))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        let acls = map_acls(path, acl)?;
        let options = map_mode(mode).with_acls(acls);
        let (_, sequence) = self
            .client()?
            .create(path, data, &options)
            .await
            .map_err(|e| map_error(e, path, None))?;
        if mode.is_sequential() {
            Ok(format!("{}{}", path, sequence))
        } else {
            Ok(path.to_string())
        }
    }

    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.client()?
            .delete(path, version)
            .await
            .map_err(|e| map_error(e, path, version))
    }

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<Stat> {
        let stat = self
            .client()?
            .set_data(path, data, version)
            .await
            .map_err(|e| map_error(e, path, version))?;
        Ok(map_stat(&stat))
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)> {
        let (data, stat) = self
            .client()?
            .get_data(path)
            .await
            .map_err(|e| map_error(e, path, None))?;
        Ok((data, map_stat(&stat)))
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|e| map_error(e, path, None))?;
        Ok(stat.as_ref().map(map_stat))
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        self.client()?
            .list_children(path)
            .await
            .map_err(|e| map_error(e, path, None))
    }

    async fn sync(
        &self,
        path: &str,
    ) -> Result<()> {
        self.client()?
            .sync(path)
            .await
            .map_err(|e| map_error(e, path, None))
    }

    async fn add_watch(
        &self,
        path: &str,
        mode: AddWatchMode,
    ) -> Result<WatchRegistration> {
        let zk_mode = match mode {
            AddWatchMode::Persistent => zk::AddWatchMode::Persistent,
            AddWatchMode::PersistentRecursive => zk::AddWatchMode::PersistentRecursive,
        };
        let mut watcher = self
            .client()?
            .watch(path, zk_mode)
            .await
            .map_err(|e| map_error(e, path, None))?;

        let id = self.next_watch.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        self.watches.insert(id, cancel.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = path.to_string();

        spawn_task("zookeeper_watch", move || async move {
            let cancelled = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break true,
                    event = watcher.changed() => {
                        let event_type = match event.event_type {
                            zk::EventType::NodeCreated => EventType::NodeCreated,
                            zk::EventType::NodeDeleted => EventType::NodeDeleted,
                            zk::EventType::NodeDataChanged => EventType::NodeDataChanged,
                            zk::EventType::NodeChildrenChanged => EventType::NodeChildrenChanged,
                            zk::EventType::Session => {
                                if matches!(event.session_state, zk::SessionState::Expired | zk::SessionState::Closed) {
                                    break false;
                                }
                                continue;
                            }
                            #[allow(unreachable_patterns)]
                            _ => continue,
                        };
                        let forwarded = WatchedEvent {
                            event_type,
                            path: event.path,
                        };
                        // receiver dropped, nobody listens any more
                        if tx.send(forwarded).is_err() {
                            break true;
                        }
                    }
                }
            };
            if cancelled {
                if let Err(e) = watcher.remove().await {
                    debug!(path = %watched, %e, "failed to remove persistent watch");
                }
            }
            debug!(path = %watched, "persistent watch pump stopped");
            Ok(())
        });

        Ok(WatchRegistration { id, events: rx })
    }

    async fn remove_watch(
        &self,
        id: WatchId,
    ) -> Result<()> {
        if let Some((_, cancel)) = self.watches.remove(&id) {
            cancel.cancel();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(client) = self.client.lock().take() else {
            return Ok(());
        };
        for entry in self.watches.iter() {
            entry.value().cancel();
        }
        self.watches.clear();
        drop(client);
        info!(session = self.id, "zookeeper session closed");
        Ok(())
    }
}

fn map_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

/// Sessions only ever apply the open or creator-only ACL.
pub(super) fn map_acls(
    path: &str,
    acl: &[Acl],
) -> Result<zk::Acls<'static>> {
    if acl == Acl::open_unsafe().as_slice() {
        Ok(zk::Acls::anyone_all())
    } else if acl == Acl::creator_all().as_slice() {
        Ok(zk::Acls::creator_all())
    } else {
        warn!(path, ?acl, "unsupported acl for zookeeper backend");
        Err(CoordinationError::InvalidAcl(path.to_string()).into())
    }
}

pub(super) fn map_stat(stat: &zk::Stat) -> Stat {
    Stat {
        czxid: stat.czxid,
        mzxid: stat.mzxid,
        ctime: stat.ctime,
        mtime: stat.mtime,
        version: stat.version,
        cversion: stat.cversion,
        ephemeral_owner: stat.ephemeral_owner as SessionId,
        data_length: stat.data_length,
        num_children: stat.num_children,
    }
}

pub(super) fn map_error(
    e: zk::Error,
    path: &str,
    version: Option<i32>,
) -> Error {
    let path = path.to_string();
    match e {
        zk::Error::NoNode => CoordinationError::NoNode(path).into(),
        zk::Error::NodeExists => CoordinationError::NodeExists(path).into(),
        zk::Error::NotEmpty => CoordinationError::NotEmpty(path).into(),
        zk::Error::BadVersion => CoordinationError::BadVersion {
            path,
            expected: version.unwrap_or(-1),
            actual: -1,
        }
        .into(),
        zk::Error::NoAuth => CoordinationError::NoAuth(path).into(),
        zk::Error::InvalidAcl => CoordinationError::InvalidAcl(path).into(),
        zk::Error::NoChildrenForEphemerals => CoordinationError::NoChildrenForEphemerals(path).into(),
        zk::Error::ConnectionLoss => ConnectionError::ConnectionLoss.into(),
        zk::Error::Timeout => ConnectionError::Timeout {
            operation: path,
            duration: Duration::ZERO,
        }
        .into(),
        zk::Error::SessionExpired => ConnectionError::SessionExpired(0).into(),
        zk::Error::ClientClosed => Error::SessionClosed,
        other => CoordinationError::BadArguments(format!("{}: {}", path, other)).into(),
    }
}
