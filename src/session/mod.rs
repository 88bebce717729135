//! Coordination session.
//!
//! A [`Session`] owns the connected [`Coordinator`] and is shared by every
//! other component. It validates and namespaces paths, applies the session
//! ACL to created nodes and retries transient failures with the configured
//! [`BackoffPolicy`].


use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::backend::Acl;
use crate::backend::AddWatchMode;
use crate::backend::Connector;
use crate::backend::Coordinator;
use crate::backend::CreateMode;
use crate::backend::SessionId;
use crate::backend::Stat;
use crate::backend::WatchId;
use crate::backend::WatchRegistration;
use crate::utils::async_task::backoff_delay;
use crate::utils::async_task::spawn_task;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::utils::path;
use crate::BackoffPolicy;
use crate::ConnectionError;
use crate::CoordConfig;
use crate::Error;
use crate::Result;

/// What a background delete keeps retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteTarget {
    Node,
    Subtree,
}

/// Shared handle to one coordination session.
///
/// Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    coordinator: Arc<dyn Coordinator>,
    namespace: String,
    acl: Vec<Acl>,
    policy: BackoffPolicy,
    background_delete_interval: Duration,
    closed: AtomicBool,
    shutdown: CancellationToken,
    pending_deletes: AtomicUsize,
}

impl fmt::Debug for Session {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("namespace", &self.inner.namespace)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Connects to the configured servers, retrying transient failures.
    ///
    /// Exhausted retries surface as [`ConnectionError::RetryExhausted`].
    pub async fn connect(
        config: &CoordConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Session> {
        let servers = config.session.servers();
        if servers.is_empty() {
            return Err(ConnectionError::NoServers.into());
        }
        let session_timeout = config.session.session_timeout();

        // connecting is bounded by the connection timeout rather than the per-operation one
        let connect_policy = BackoffPolicy {
            timeout_ms: config.session.connection_timeout_ms,
            ..config.retry
        };
        let coordinator = task_with_timeout_and_exponential_backoff(
            "connect",
            || connector.connect(&servers, session_timeout),
            &connect_policy,
        )
        .await?;

        match Self::establish(coordinator.clone(), config).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(close_err) = coordinator.close().await {
                    warn!(%close_err, "failed to close half-initialized session");
                }
                Err(e)
            }
        }
    }

    /// Wraps an already connected coordinator: authenticates and creates the
    /// namespace root.
    pub async fn establish(
        coordinator: Arc<dyn Coordinator>,
        config: &CoordConfig,
    ) -> Result<Session> {
        let namespace = path::normalize_namespace(&config.session.namespace)?;
        let credential = config.session.credential();
        let acl = if credential.is_some() {
            Acl::creator_all()
        } else {
            Acl::open_unsafe()
        };

        let session = Session {
            inner: Arc::new(SessionInner {
                coordinator,
                namespace,
                acl,
                policy: config.retry,
                background_delete_interval: config.repository.background_delete_interval(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                pending_deletes: AtomicUsize::new(0),
            }),
        };

        if let Some(credential) = credential {
            let c = &session.inner.coordinator;
            session
                .retry("add_auth", move || c.add_auth("digest", credential.as_bytes()))
                .await?;
        }

        if !session.inner.namespace.is_empty() {
            let ns = session.inner.namespace.clone();
            session.ensure_absolute_path(&ns).await?;
        }

        info!(
            session_id = session.session_id(),
            namespace = %session.inner.namespace,
            "coordination session established"
        );
        Ok(session)
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.coordinator.session_id()
    }

    /// Normalized namespace prefix, empty when none is configured.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// ACL applied to every node this session creates.
    pub fn acl(&self) -> &[Acl] {
        &self.inner.acl
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Deletes still being retried in the background.
    pub fn pending_deletes(&self) -> usize {
        self.inner.pending_deletes.load(Ordering::SeqCst)
    }

    /// Cancelled when the session closes.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Namespace-relative path to absolute service path.
    pub fn resolve(
        &self,
        path: &str,
    ) -> Result<String> {
        path::resolve(&self.inner.namespace, path)
    }

    /// Absolute service path to namespace-relative path.
    pub fn relativize(
        &self,
        absolute: &str,
    ) -> String {
        path::relativize(&self.inner.namespace, absolute)
    }

    async fn retry<F, T, P>(
        &self,
        operation: &str,
        task: F,
    ) -> Result<P>
    where
        F: Fn() -> T,
        T: std::future::Future<Output = Result<P>>,
    {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        task_with_timeout_and_exponential_backoff(operation, task, &self.inner.policy).await
    }

    /// Creates `path` and returns the created namespace-relative path, which
    /// carries the sequence suffix for sequential modes.
    pub async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        create_parents: bool,
    ) -> Result<String> {
        let abs = self.resolve(path)?;
        if create_parents {
            for ancestor in path::ancestors(&abs) {
                self.ensure_absolute_path(&ancestor).await?;
            }
        }

        let c = &self.inner.coordinator;
        let acl = self.inner.acl.as_slice();
        let abs = abs.as_str();
        let created = self.retry("create", move || c.create(abs, data, acl, mode)).await?;
        Ok(self.relativize(&created))
    }

    /// Creates a sequential node whose name starts with a caller-unique
    /// prefix, surviving lost replies: before every retry the parent is
    /// searched for a node carrying that prefix, and a match is adopted
    /// instead of creating a second one.
    pub async fn create_protected(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        let abs = self.resolve(path)?;
        for ancestor in path::ancestors(&abs) {
            self.ensure_absolute_path(&ancestor).await?;
        }
        let parent = path::parent(&abs).unwrap_or(path::ROOT);
        let prefix = path::basename(&abs);

        let c = &self.inner.coordinator;
        let acl = self.inner.acl.as_slice();
        let abs = abs.as_str();
        let attempted = AtomicBool::new(false);
        let attempted = &attempted;
        let created = self
            .retry("create", move || async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    let children = c.get_children(parent).await?;
                    if let Some(name) = children.iter().find(|name| name.starts_with(prefix)) {
                        debug!(parent, name = %name, "adopting node created before a lost reply");
                        return Ok(path::join(parent, name));
                    }
                }
                c.create(abs, data, acl, mode).await
            })
            .await?;
        Ok(self.relativize(&created))
    }

    /// Creates an empty persistent node at `abs` unless it already exists.
    async fn ensure_absolute_path(
        &self,
        abs: &str,
    ) -> Result<()> {
        let c = &self.inner.coordinator;
        if self.retry("exists", move || c.exists(abs)).await?.is_some() {
            return Ok(());
        }
        let acl = self.inner.acl.as_slice();
        match self
            .retry("create", move || c.create(abs, &[], acl, CreateMode::Persistent))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_node_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes a childless node.
    pub async fn delete(
        &self,
        path: &str,
    ) -> Result<()> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("delete", move || c.delete(abs, None)).await
    }

    /// Deletes a childless node, handing transient failures to a background
    /// task that keeps retrying until the node is gone or the session closes.
    ///
    /// Logical failures (missing node, children present, no permission) are
    /// returned immediately.
    pub async fn delete_guaranteed(
        &self,
        path: &str,
    ) -> Result<()> {
        match self.delete(path).await {
            Err(e) if e.is_transient() => {
                warn!(path, %e, "delete failed transiently, retrying in background");
                let abs = self.resolve(path)?;
                self.spawn_background_delete(abs, DeleteTarget::Node);
                Ok(())
            }
            other => other,
        }
    }

    /// Deletes `path` and everything below it, children before parents.
    ///
    /// A transient failure at any step hands the whole remaining subtree to a
    /// background task, which re-lists and deletes it until the root is gone
    /// or the session closes.
    pub async fn delete_tree_guaranteed(
        &self,
        path: &str,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let abs = self.resolve(path)?;
        match self.inner.remove_subtree(&abs, true).await {
            Err(e) if e.is_transient() => {
                warn!(path, %e, "subtree delete failed transiently, retrying in background");
                self.spawn_background_delete(abs, DeleteTarget::Subtree);
                Ok(())
            }
            other => other,
        }
    }

    fn spawn_background_delete(
        &self,
        abs: String,
        target: DeleteTarget,
    ) {
        let inner = self.inner.clone();
        inner.pending_deletes.fetch_add(1, Ordering::SeqCst);

        spawn_task("guaranteed_delete", move || async move {
            let mut attempt = 0;
            let result = loop {
                let delay = inner
                    .background_delete_interval
                    .max(backoff_delay(&inner.policy, attempt));
                tokio::select! {
                    _ = inner.shutdown.cancelled() => {
                        debug!(path = %abs, "session closed, abandoning background delete");
                        break Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                let outcome = match target {
                    DeleteTarget::Node => inner.coordinator.delete(&abs, None).await,
                    DeleteTarget::Subtree => inner.remove_subtree(&abs, false).await,
                };
                match outcome {
                    Ok(()) => {
                        debug!(path = %abs, attempt, ?target, "background delete succeeded");
                        break Ok(());
                    }
                    Err(e) if e.is_not_found() => break Ok(()),
                    // a child appeared between listing and deleting, list again
                    Err(e) if e.is_transient() || (target == DeleteTarget::Subtree && e.is_not_empty()) => {
                        debug!(path = %abs, attempt, %e, "background delete still failing");
                        attempt = attempt.saturating_add(1);
                    }
                    Err(e) => {
                        error!(path = %abs, %e, "background delete gave up");
                        break Err(e);
                    }
                }
            };
            inner.pending_deletes.fetch_sub(1, Ordering::SeqCst);
            result
        });
    }

    /// Unconditional overwrite.
    pub async fn set_data(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<Stat> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("set_data", move || c.set_data(abs, data, None)).await
    }

    pub async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("get_data", move || c.get_data(abs)).await
    }

    pub async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("exists", move || c.exists(abs)).await
    }

    /// Child names in service order.
    pub async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("get_children", move || c.get_children(abs)).await
    }

    pub async fn sync(
        &self,
        path: &str,
    ) -> Result<()> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("sync", move || c.sync(abs)).await
    }

    /// Registers a persistent watch. Event paths are absolute; use
    /// [`Session::relativize`] before handing them out.
    pub async fn add_watch(
        &self,
        path: &str,
        mode: AddWatchMode,
    ) -> Result<WatchRegistration> {
        let abs = self.resolve(path)?;
        let c = &self.inner.coordinator;
        let abs = abs.as_str();
        self.retry("add_watch", move || c.add_watch(abs, mode)).await
    }

    pub async fn remove_watch(
        &self,
        id: WatchId,
    ) -> Result<()> {
        let c = &self.inner.coordinator;
        self.retry("remove_watch", move || c.remove_watch(id)).await
    }

    /// Cancels background work and ends the session. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        info!(session_id = self.session_id(), "closing coordination session");
        self.inner.coordinator.close().await
    }
}

impl SessionInner {
    /// One attempt, or the full retry policy when `retrying` is set.
    async fn call<F, T, P>(
        &self,
        operation: &str,
        retrying: bool,
        task: F,
    ) -> Result<P>
    where
        F: Fn() -> T,
        T: std::future::Future<Output = Result<P>>,
    {
        if retrying {
            task_with_timeout_and_exponential_backoff(operation, task, &self.policy).await
        } else {
            task().await
        }
    }

    /// Lists the subtree at `abs` breadth-first, then deletes it in reverse
    /// order so children go before their parents. A missing root is `NoNode`.
    async fn remove_subtree(
        &self,
        abs: &str,
        retrying: bool,
    ) -> Result<()> {
        let c = &self.coordinator;
        let mut order = vec![abs.to_string()];
        let mut next = 0;
        while next < order.len() {
            let current = order[next].clone();
            let listed = {
                let current = current.as_str();
                self.call("get_children", retrying, move || c.get_children(current)).await
            };
            match listed {
                Ok(children) => order.extend(children.iter().map(|name| path::join(&current, name))),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            next += 1;
        }

        for node in order.iter().rev() {
            let target = node.as_str();
            match self.call("delete", retrying, move || c.delete(target, None)).await {
                Ok(()) => {}
                // a concurrent deleter got there first
                Err(e) if e.is_not_found() && target != abs => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
