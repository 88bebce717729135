//! In-process coordination ensemble.
//!
//! Keeps a hierarchical namespace with ZooKeeper semantics in a single
//! `BTreeMap`: versioned nodes, ACLs checked against session identities,
//! ephemeral ownership, sequential naming and persistent watches. Every
//! mutation fires its events while the state lock is held so each watcher
//! observes changes in commit order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use super::perms;
use super::Acl;
use super::AddWatchMode;
use super::Connector;
use super::Coordinator;
use super::CreateMode;
use super::EventType;
use super::Id;
use super::SessionId;
use super::Stat;
use super::WatchId;
use super::WatchRegistration;
use super::WatchedEvent;
use crate::utils::path;
use crate::utils::time::get_now_as_millis;
use crate::ConnectionError;
use crate::CoordinationError;
use crate::Error;
use crate::Result;

struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
    stat: Stat,
    children: BTreeSet<String>,
}

impl Node {
    fn new(
        data: Vec<u8>,
        acl: Vec<Acl>,
        zxid: i64,
        owner: SessionId,
    ) -> Self {
        let now = get_now_as_millis();
        Self {
            stat: Stat {
                czxid: zxid,
                mzxid: zxid,
                ctime: now,
                mtime: now,
                ephemeral_owner: owner,
                ..Default::default()
            },
            data,
            acl,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            data_length: self.data.len() as i32,
            num_children: self.children.len() as i32,
            ..self.stat.clone()
        }
    }
}

#[derive(Default)]
struct SessionState {
    auth: Vec<Id>,
    ephemerals: BTreeSet<String>,
}

struct Watch {
    session: SessionId,
    path: String,
    mode: AddWatchMode,
    tx: mpsc::UnboundedSender<WatchedEvent>,
}

impl Watch {
    fn matches(
        &self,
        event: &WatchedEvent,
    ) -> bool {
        match self.mode {
            AddWatchMode::Persistent => event.path == self.path,
            AddWatchMode::PersistentRecursive => {
                event.event_type != EventType::NodeChildrenChanged && path::is_ancestor_or_self(&self.path, &event.path)
            }
        }
    }
}

struct EnsembleState {
    nodes: BTreeMap<String, Node>,
    zxid: i64,
    sessions: HashMap<SessionId, SessionState>,
    watches: HashMap<WatchId, Watch>,
    next_watch: WatchId,
}

impl EnsembleState {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(path::ROOT.to_string(), Node::new(Vec::new(), Acl::open_unsafe(), 0, 0));
        Self {
            nodes,
            zxid: 0,
            sessions: HashMap::new(),
            watches: HashMap::new(),
            next_watch: 1,
        }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn node(
        &self,
        path: &str,
    ) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()).into())
    }

    fn check_perm(
        &self,
        session: SessionId,
        node: &Node,
        path: &str,
        perm: u32,
    ) -> Result<()> {
        let identities = self.sessions.get(&session).map(|s| s.auth.as_slice()).unwrap_or(&[]);
        let allowed = node.acl.iter().any(|acl| {
            acl.perms & perm != 0 && (acl.id == Id::anyone() || identities.iter().any(|id| *id == acl.id))
        });
        if allowed {
            Ok(())
        } else {
            Err(CoordinationError::NoAuth(path.to_string()).into())
        }
    }

    /// Expands `auth` placeholders into the creating session's identities.
    fn resolve_acl(
        &self,
        session: SessionId,
        path: &str,
        acl: &[Acl],
    ) -> Result<Vec<Acl>> {
        if acl.is_empty() {
            return Err(CoordinationError::InvalidAcl(path.to_string()).into());
        }
        let identities = self.sessions.get(&session).map(|s| s.auth.as_slice()).unwrap_or(&[]);
        let mut resolved = Vec::with_capacity(acl.len());
        for entry in acl {
            if entry.id.scheme == "auth" {
                if identities.is_empty() {
                    return Err(CoordinationError::InvalidAcl(path.to_string()).into());
                }
                resolved.extend(identities.iter().map(|id| Acl {
                    perms: entry.perms,
                    id: id.clone(),
                }));
            } else {
                resolved.push(entry.clone());
            }
        }
        Ok(resolved)
    }

    fn fire(
        &mut self,
        event_type: EventType,
        path: &str,
    ) {
        let event = WatchedEvent {
            event_type,
            path: path.to_string(),
        };
        let mut dead = Vec::new();
        for (id, watch) in self.watches.iter() {
            if watch.matches(&event) && watch.tx.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            trace!(watch_id = id, "dropping watch with closed receiver");
            self.watches.remove(&id);
        }
    }

    fn create(
        &mut self,
        session: SessionId,
        node_path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        path::validate(node_path)?;
        let parent_path = match path::parent(node_path) {
            Some(p) => p.to_string(),
            None => return Err(CoordinationError::NodeExists(node_path.to_string()).into()),
        };
        let acl = self.resolve_acl(session, node_path, acl)?;

        let parent = self.node(&parent_path)?;
        self.check_perm(session, parent, &parent_path, perms::CREATE)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(CoordinationError::NoChildrenForEphemerals(parent_path).into());
        }

        let actual = if mode.is_sequential() {
            format!("{}{:010}", node_path, parent.stat.cversion)
        } else {
            node_path.to_string()
        };
        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists(actual).into());
        }

        let zxid = self.next_zxid();
        let owner = if mode.is_ephemeral() { session } else { 0 };
        self.nodes.insert(actual.clone(), Node::new(data.to_vec(), acl, zxid, owner));
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.insert(path::basename(&actual).to_string());
            parent.stat.cversion += 1;
        }
        if mode.is_ephemeral() {
            if let Some(s) = self.sessions.get_mut(&session) {
                s.ephemerals.insert(actual.clone());
            }
        }

        self.fire(EventType::NodeCreated, &actual);
        self.fire(EventType::NodeChildrenChanged, &parent_path);
        Ok(actual)
    }

    fn delete(
        &mut self,
        session: Option<SessionId>,
        node_path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        path::validate(node_path)?;
        let parent_path = match path::parent(node_path) {
            Some(p) => p.to_string(),
            None => return Err(CoordinationError::BadArguments("the root node cannot be deleted".into()).into()),
        };

        let node = self.node(node_path)?;
        if let Some(session) = session {
            let parent = self.node(&parent_path)?;
            self.check_perm(session, parent, &parent_path, perms::DELETE)?;
        }
        if let Some(expected) = version {
            if expected != node.stat.version {
                return Err(CoordinationError::BadVersion {
                    path: node_path.to_string(),
                    expected,
                    actual: node.stat.version,
                }
                .into());
            }
        }
        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty(node_path.to_string()).into());
        }

        let owner = node.stat.ephemeral_owner;
        self.next_zxid();
        self.nodes.remove(node_path);
        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(path::basename(node_path));
            parent.stat.cversion += 1;
        }
        if owner != 0 {
            if let Some(s) = self.sessions.get_mut(&owner) {
                s.ephemerals.remove(node_path);
            }
        }

        self.fire(EventType::NodeDeleted, node_path);
        self.fire(EventType::NodeChildrenChanged, &parent_path);
        Ok(())
    }

    fn set_data(
        &mut self,
        session: SessionId,
        node_path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<Stat> {
        path::validate(node_path)?;
        let node = self.node(node_path)?;
        self.check_perm(session, node, node_path, perms::WRITE)?;
        if let Some(expected) = version {
            if expected != node.stat.version {
                return Err(CoordinationError::BadVersion {
                    path: node_path.to_string(),
                    expected,
                    actual: node.stat.version,
                }
                .into());
            }
        }

        let zxid = self.next_zxid();
        let stat = match self.nodes.get_mut(node_path) {
            Some(node) => {
                node.data = data.to_vec();
                node.stat.version += 1;
                node.stat.mzxid = zxid;
                node.stat.mtime = get_now_as_millis();
                node.stat()
            }
            None => return Err(CoordinationError::NoNode(node_path.to_string()).into()),
        };

        self.fire(EventType::NodeDataChanged, node_path);
        Ok(stat)
    }

    /// Drops a session's watches and ephemeral nodes.
    fn end_session(
        &mut self,
        session: SessionId,
    ) {
        self.watches.retain(|_, w| w.session != session);
        let Some(state) = self.sessions.remove(&session) else {
            return;
        };
        // deepest first, although ephemerals never have children
        for ephemeral in state.ephemerals.iter().rev() {
            if let Err(e) = self.delete(None, ephemeral, None) {
                debug!(session, path = %ephemeral, %e, "ephemeral already gone");
            }
        }
    }
}

struct EnsembleInner {
    state: Mutex<EnsembleState>,
    next_session: AtomicU64,
    failing_connects: AtomicUsize,
    failing_operations: AtomicUsize,
    connects: AtomicUsize,
    syncs: AtomicUsize,
}

impl EnsembleInner {
    /// Consumes one injected failure if any are pending.
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Shared in-memory coordination service.
///
/// Cloning yields another handle to the same tree. Sessions opened through
/// [`Connector::connect`] see each other's writes immediately.
#[derive(Clone)]
pub struct MemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEnsemble {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryEnsemble")
            .field("nodes", &state.nodes.len())
            .field("sessions", &state.sessions.len())
            .field("watches", &state.watches.len())
            .finish()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnsembleInner {
                state: Mutex::new(EnsembleState::new()),
                next_session: AtomicU64::new(1),
                failing_connects: AtomicUsize::new(0),
                failing_operations: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                syncs: AtomicUsize::new(0),
            }),
        }
    }

    /// Opens a session directly, bypassing connect fault injection.
    pub fn open_session(&self) -> MemorySession {
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().sessions.insert(id, SessionState::default());
        debug!(session = id, "memory session opened");
        MemorySession {
            id,
            ensemble: self.inner.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// The next `n` connect attempts fail with a connection loss.
    pub fn fail_next_connects(
        &self,
        n: usize,
    ) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// The next `n` session operations fail with a connection loss.
    pub fn fail_next_operations(
        &self,
        n: usize,
    ) {
        self.inner.failing_operations.store(n, Ordering::SeqCst);
    }

    /// Drops a session as if its timeout elapsed.
    pub fn expire_session(
        &self,
        session: SessionId,
    ) {
        self.inner.state.lock().end_session(session);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn sync_count(&self) -> usize {
        self.inner.syncs.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.inner.state.lock().watches.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// Reads a node regardless of ACLs.
    pub fn node_data(
        &self,
        path: &str,
    ) -> Option<Vec<u8>> {
        self.inner.state.lock().nodes.get(path).map(|n| n.data.clone())
    }

    /// Every node path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.state.lock().nodes.keys().cloned().collect()
    }
}

#[async_trait]
impl Connector for MemoryEnsemble {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<Arc<dyn Coordinator>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if servers.is_empty() {
            return Err(ConnectionError::NoServers.into());
        }
        if EnsembleInner::take_failure(&self.inner.failing_connects) {
            return Err(ConnectionError::ConnectionLoss.into());
        }
        let session = self.open_session();
        debug!(session = session.id, ?servers, ?session_timeout, "connected to memory ensemble");
        Ok(Arc::new(session))
    }
}

/// A session on a [`MemoryEnsemble`].
pub struct MemorySession {
    id: SessionId,
    ensemble: Arc<EnsembleInner>,
    closed: AtomicBool,
}

impl MemorySession {
    /// Locks the ensemble for one operation after liveness and fault checks.
    fn begin(&self) -> Result<parking_lot::MutexGuard<'_, EnsembleState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        if EnsembleInner::take_failure(&self.ensemble.failing_operations) {
            return Err(ConnectionError::ConnectionLoss.into());
        }
        let state = self.ensemble.state.lock();
        if !state.sessions.contains_key(&self.id) {
            return Err(ConnectionError::SessionExpired(self.id).into());
        }
        Ok(state)
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn add_auth(
        &self,
        scheme: &str,
        auth: &[u8],
    ) -> Result<()> {
        let mut state = self.begin()?;
        let credential = String::from_utf8_lossy(auth).to_string();
        if scheme == "digest" && !credential.contains(':') {
            return Err(CoordinationError::BadArguments("digest credential must be `user:password`".into()).into());
        }
        if let Some(s) = state.sessions.get_mut(&self.id) {
            let id = Id::new(scheme, credential);
            if !s.auth.contains(&id) {
                s.auth.push(id);
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        self.begin()?.create(self.id, path, data, acl, mode)
    }

    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.begin()?.delete(Some(self.id), path, version)
    }

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<Stat> {
        self.begin()?.set_data(self.id, path, data, version)
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)> {
        path::validate(path)?;
        let state = self.begin()?;
        let node = state.node(path)?;
        state.check_perm(self.id, node, path, perms::READ)?;
        Ok((node.data.clone(), node.stat()))
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        path::validate(path)?;
        let state = self.begin()?;
        Ok(state.nodes.get(path).map(Node::stat))
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        path::validate(path)?;
        let state = self.begin()?;
        let node = state.node(path)?;
        state.check_perm(self.id, node, path, perms::READ)?;
        Ok(node.children.iter().cloned().collect())
    }

    async fn sync(
        &self,
        path: &str,
    ) -> Result<()> {
        path::validate(path)?;
        let _state = self.begin()?;
        self.ensemble.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_watch(
        &self,
        path: &str,
        mode: AddWatchMode,
    ) -> Result<WatchRegistration> {
        path::validate(path)?;
        let mut state = self.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_watch;
        state.next_watch += 1;
        state.watches.insert(
            id,
            Watch {
                session: self.id,
                path: path.to_string(),
                mode,
                tx,
            },
        );
        trace!(session = self.id, watch_id = id, path, ?mode, "watch added");
        Ok(WatchRegistration { id, events: rx })
    }

    async fn remove_watch(
        &self,
        id: WatchId,
    ) -> Result<()> {
        let mut state = self.begin()?;
        state.watches.remove(&id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ensemble.state.lock().end_session(self.id);
        debug!(session = self.id, "memory session closed");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ensemble.state.lock().end_session(self.id);
        }
    }
}
