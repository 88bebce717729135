//! Distributed locks.
//!
//! [`InterProcessLock`] is a reentrant lock recipe over ephemeral sequential
//! nodes: contenders queue by sequence and each waits only for the node
//! directly blocking it, so a release wakes a single waiter. Lock nodes are
//! ephemeral, a lost session releases everything it held.

mod internals;

pub use internals::LockKind;


use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::backend::AddWatchMode;
use crate::backend::CreateMode;
use crate::backend::EventType;
use crate::metrics::LOCK_WAIT_SECONDS;
use crate::utils::path;
use crate::CoordinationError;
use crate::Error;
use crate::Result;
use crate::Session;

const HOLDER_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v',
    'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

#[derive(Debug)]
struct Holding {
    /// Namespace-relative path of our lock node
    node: String,
    count: usize,
}

type HoldState = Arc<Mutex<Option<Holding>>>;

/// One logical lock holder for a lock path.
///
/// Acquisitions through the same handle are reentrant and must each be
/// matched by a [`release`](InterProcessLock::release). Separate handles,
/// even in the same process, contend with each other.
pub struct InterProcessLock {
    session: Session,
    lock_path: String,
    kind: LockKind,
    holder: String,
    state: HoldState,
    /// Write state of the sibling write lock, for read locks only
    write_state: Option<HoldState>,
    acquiring: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for InterProcessLock {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InterProcessLock")
            .field("lock_path", &self.lock_path)
            .field("kind", &self.kind)
            .field("holder", &self.holder)
            .field("hold_count", &self.hold_count())
            .finish()
    }
}

impl InterProcessLock {
    fn new(
        session: Session,
        lock_path: &str,
        kind: LockKind,
        write_state: Option<HoldState>,
    ) -> Result<Self> {
        path::validate(lock_path)?;
        Ok(Self {
            session,
            lock_path: lock_path.to_string(),
            kind,
            holder: nanoid::nanoid!(16, &HOLDER_ALPHABET),
            state: Arc::new(Mutex::new(None)),
            write_state,
            acquiring: tokio::sync::Mutex::new(()),
        })
    }

    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn hold_count(&self) -> usize {
        self.state.lock().as_ref().map(|h| h.count).unwrap_or(0)
    }

    /// Tries to take the lock within `timeout`.
    ///
    /// Returns `false` on timeout; the contender node is removed again so the
    /// queue is not blocked by an abandoned attempt.
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let deadline = started + timeout;

        let Ok(_guard) = tokio::time::timeout_at(deadline, self.acquiring.lock()).await else {
            return Ok(false);
        };

        {
            let mut state = self.state.lock();
            if let Some(holding) = state.as_mut() {
                holding.count += 1;
                debug!(lock_path = %self.lock_path, count = holding.count, "lock re-entered");
                return Ok(true);
            }
        }

        let prefix = path::join(&self.lock_path, &internals::node_prefix(&self.holder, self.kind));
        let node = self
            .session
            .create_protected(&prefix, &[], CreateMode::EphemeralSequential)
            .await?;

        let result = self.wait_for_turn(&node, deadline).await;
        let acquired = matches!(result, Ok(true));
        LOCK_WAIT_SECONDS
            .with_label_values(&[self.kind.label(), if acquired { "true" } else { "false" }])
            .observe(started.elapsed().as_secs_f64());

        if acquired {
            *self.state.lock() = Some(Holding { node, count: 1 });
            debug!(lock_path = %self.lock_path, kind = self.kind.label(), "lock acquired");
        } else {
            self.discard(&node).await;
        }
        result
    }

    async fn wait_for_turn(
        &self,
        node: &str,
        deadline: Instant,
    ) -> Result<bool> {
        let ours = path::basename(node);
        loop {
            let contenders = internals::sort_contenders(self.session.get_children(&self.lock_path).await?);
            let Some(index) = contenders.iter().position(|c| c == ours) else {
                // our ephemeral node is gone, the session was lost
                return Err(CoordinationError::NoNode(node.to_string()).into());
            };

            let holds_write = self.write_state.as_ref().map(|s| s.lock().is_some()).unwrap_or(false);
            let Some(blocker) = internals::blocking_contender(self.kind, &contenders, index, holds_write) else {
                return Ok(true);
            };
            if Instant::now() >= deadline {
                return Ok(false);
            }

            let blocker = path::join(&self.lock_path, blocker);
            if !self.wait_for_deletion(&blocker, deadline).await? {
                return Ok(false);
            }
        }
    }

    /// Waits until `target` is deleted. `false` means the deadline passed.
    async fn wait_for_deletion(
        &self,
        target: &str,
        deadline: Instant,
    ) -> Result<bool> {
        let mut registration = self.session.add_watch(target, AddWatchMode::Persistent).await?;

        let outcome = async {
            // it may have gone before the watch was in place
            if self.session.exists(target).await?.is_none() {
                return Ok(true);
            }
            loop {
                match tokio::time::timeout_at(deadline, registration.events.recv()).await {
                    Err(_) => return Ok(false),
                    Ok(Some(event)) if event.event_type == EventType::NodeDeleted => return Ok(true),
                    Ok(Some(_)) => continue,
                    Ok(None) if self.session.is_closed() => return Err(Error::SessionClosed),
                    // stream ended without a close, re-evaluate the queue
                    Ok(None) => return Ok(true),
                }
            }
        }
        .await;

        if !self.session.is_closed() {
            if let Err(e) = self.session.remove_watch(registration.id).await {
                warn!(target, %e, "failed to remove lock watch");
            }
        }
        outcome
    }

    async fn discard(
        &self,
        node: &str,
    ) {
        if self.session.is_closed() {
            return;
        }
        match self.session.delete_guaranteed(node).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(node, %e, "failed to remove abandoned lock node"),
        }
    }

    /// Releases one acquisition; the lock node is deleted on the last one.
    pub async fn release(&self) -> Result<()> {
        let node = {
            let mut state = self.state.lock();
            let Some(holding) = state.as_mut() else {
                return Err(Error::LockNotHeld(self.lock_path.clone()));
            };
            if holding.count > 1 {
                holding.count -= 1;
                return Ok(());
            }
            state.take().map(|h| h.node)
        };

        if let Some(node) = node {
            match self.session.delete_guaranteed(&node).await {
                Ok(()) => {}
                // expired session already removed it
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            debug!(lock_path = %self.lock_path, kind = self.kind.label(), "lock released");
        }
        Ok(())
    }

    /// Namespace-relative paths of all contenders in queue order.
    pub async fn participant_nodes(&self) -> Result<Vec<String>> {
        let children = self.session.get_children(&self.lock_path).await?;
        Ok(internals::sort_contenders(children)
            .iter()
            .map(|name| path::join(&self.lock_path, name))
            .collect())
    }
}

/// Reader/writer lock pair sharing one lock path.
///
/// The write lock excludes readers and other writers. Readers share the
/// lock but queue behind any earlier writer. Holding the write lock lets the
/// same pair take the read lock too.
#[derive(Debug)]
pub struct ReadWriteLock {
    read: InterProcessLock,
    write: InterProcessLock,
}

impl ReadWriteLock {
    fn new(
        session: Session,
        lock_path: &str,
    ) -> Result<Self> {
        let write = InterProcessLock::new(session.clone(), lock_path, LockKind::Write, None)?;
        let read = InterProcessLock::new(session, lock_path, LockKind::Read, Some(write.state.clone()))?;
        Ok(Self { read, write })
    }

    pub fn read_lock(&self) -> &InterProcessLock {
        &self.read
    }

    pub fn write_lock(&self) -> &InterProcessLock {
        &self.write
    }
}

/// Entry point for lock recipes on a session.
#[derive(Debug, Clone)]
pub struct LockFacade {
    session: Session,
}

impl LockFacade {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// A new exclusive lock handle, i.e. a new logical holder.
    pub fn mutex(
        &self,
        lock_path: &str,
    ) -> Result<InterProcessLock> {
        InterProcessLock::new(self.session.clone(), lock_path, LockKind::Exclusive, None)
    }

    pub fn read_write_lock(
        &self,
        lock_path: &str,
    ) -> Result<ReadWriteLock> {
        ReadWriteLock::new(self.session.clone(), lock_path)
    }

    /// Runs `action` under a fresh exclusive lock on `lock_path`.
    ///
    /// Returns `Ok(None)` without running `action` when the lock is not
    /// acquired within `timeout`.
    pub async fn with_exclusive_lock<T, F, Fut>(
        &self,
        lock_path: &str,
        timeout: Duration,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.mutex(lock_path)?;
        self.with_lock(&lock, timeout, action).await
    }

    /// Runs `action` while holding `lock`, re-entering it if already held.
    ///
    /// The lock is released on every exit path. A release failure is logged
    /// and does not replace the action's result; a panic in `action` is
    /// resumed after the release.
    pub async fn with_lock<T, F, Fut>(
        &self,
        lock: &InterProcessLock,
        timeout: Duration,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !lock.acquire(timeout).await? {
            warn!(lock_path = %lock.lock_path(), ?timeout, "could not acquire the lock");
            return Ok(None);
        }

        let result = AssertUnwindSafe(async move { action().await }).catch_unwind().await;

        if let Err(e) = lock.release().await {
            warn!(lock_path = %lock.lock_path(), %e, "failed to release lock");
        }

        match result {
            Ok(value) => Ok(Some(value)),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
