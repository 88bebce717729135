use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::Acl;
use crate::backend::AddWatchMode;
use crate::backend::Coordinator;
use crate::backend::CreateMode;
use crate::backend::SessionId;
use crate::backend::Stat;
use crate::backend::WatchId;
use crate::backend::WatchRegistration;
use crate::ConnectionError;
use crate::Result;

/// Wraps a coordinator with targeted faults and a call log.
pub struct FlakyCoordinator {
    inner: Arc<dyn Coordinator>,
    failing_deletes: Mutex<HashMap<String, usize>>,
    lost_sequential_replies: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl FlakyCoordinator {
    pub fn new(inner: Arc<dyn Coordinator>) -> Self {
        Self {
            inner,
            failing_deletes: Mutex::new(HashMap::new()),
            lost_sequential_replies: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The next `n` deletes of the absolute path `path` fail with a connection loss.
    pub fn fail_deletes_of(
        &self,
        path: &str,
        n: usize,
    ) {
        self.failing_deletes.lock().insert(path.to_string(), n);
    }

    /// The next `n` sequential creates are applied but answered with a
    /// connection loss.
    pub fn lose_sequential_create_replies(
        &self,
        n: usize,
    ) {
        self.lost_sequential_replies.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(
        &self,
        call: &'static str,
    ) {
        self.calls.lock().push(call);
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Coordinator for FlakyCoordinator {
    fn session_id(&self) -> SessionId {
        self.inner.session_id()
    }

    async fn add_auth(
        &self,
        scheme: &str,
        auth: &[u8],
    ) -> Result<()> {
        self.inner.add_auth(scheme, auth).await
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String> {
        self.record("create");
        let created = self.inner.create(path, data, acl, mode).await?;
        if mode.is_sequential() && take(&self.lost_sequential_replies) {
            return Err(ConnectionError::ConnectionLoss.into());
        }
        Ok(created)
    }

    async fn delete(
        &self,
        path: &str,
        version: Option<i32>,
    ) -> Result<()> {
        self.record("delete");
        {
            let mut failing = self.failing_deletes.lock();
            if let Some(remaining) = failing.get_mut(path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ConnectionError::ConnectionLoss.into());
                }
            }
        }
        self.inner.delete(path, version).await
    }

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<Stat> {
        self.inner.set_data(path, data, version).await
    }

    async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)> {
        self.inner.get_data(path).await
    }

    async fn exists(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        self.inner.exists(path).await
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        self.inner.get_children(path).await
    }

    async fn sync(
        &self,
        path: &str,
    ) -> Result<()> {
        self.inner.sync(path).await
    }

    async fn add_watch(
        &self,
        path: &str,
        mode: AddWatchMode,
    ) -> Result<WatchRegistration> {
        self.record("add_watch");
        self.inner.add_watch(path, mode).await
    }

    async fn remove_watch(
        &self,
        id: WatchId,
    ) -> Result<()> {
        self.record("remove_watch");
        self.inner.remove_watch(id).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
