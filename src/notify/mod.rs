//! Change notification.
//!
//! Subtree watches are persistent and recursive: one registration per path
//! receives every data change below it. Each registration owns one delivery
//! task, so events for a path reach the handler in write order. A failing
//! fetch or a panicking handler only loses that one event.

mod cache;

pub use cache::*;


use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::backend::AddWatchMode;
use crate::backend::EventType;
use crate::backend::WatchId;
use crate::backend::WatchedEvent;
use crate::metrics::WATCH_EVENTS_DELIVERED;
use crate::utils::async_task::spawn_task;
use crate::utils::path;
use crate::Result;
use crate::Session;

/// A data change below a watched path, with the payload read after the
/// change was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Namespace-relative path of the changed node
    pub path: String,
    pub payload: Vec<u8>,
}

pub type EventHandler = Arc<dyn Fn(EventRecord) + Send + Sync>;

struct Registration {
    watch_id: WatchId,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    session: Session,
    root_path: String,
    watches: DashMap<String, Registration>,
    caches: DashMap<String, Arc<LocalCache>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("root_path", &self.inner.root_path)
            .field("watches", &self.inner.watches.len())
            .field("caches", &self.inner.caches.len())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new(
        session: Session,
        root_path: &str,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                session,
                root_path: root_path.to_string(),
                watches: DashMap::new(),
                caches: DashMap::new(),
            }),
        }
    }

    /// Watches `path` and its descendants, calling `handler` for every data
    /// change. Registering the same path again replaces the previous handler.
    pub async fn watch_subtree<F>(
        &self,
        path: &str,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(EventRecord) + Send + Sync + 'static,
    {
        path::validate(path)?;
        // the old handler must be gone before the new watch can see events
        let replaced = match self.inner.watches.remove(path) {
            Some((_, previous)) => {
                debug!(path, "replacing existing subtree watch");
                self.release(path, previous).await;
                true
            }
            None => false,
        };

        let session = &self.inner.session;
        let registration = session.add_watch(path, AddWatchMode::PersistentRecursive).await?;
        let cancel = session.shutdown_token().child_token();

        spawn_delivery(
            session.clone(),
            path.to_string(),
            registration.events,
            cancel.clone(),
            Arc::new(handler),
        );

        self.inner.watches.insert(
            path.to_string(),
            Registration {
                watch_id: registration.id,
                cancel,
            },
        );
        if !replaced {
            info!(path, "subtree watch registered");
        }
        Ok(())
    }

    /// Watches the configured root path.
    pub async fn watch_root<F>(
        &self,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(EventRecord) + Send + Sync + 'static,
    {
        let root = self.inner.root_path.clone();
        self.watch_subtree(&root, handler).await
    }

    /// Removes the watch on `path`. Returns whether one was registered.
    pub async fn unwatch(
        &self,
        path: &str,
    ) -> Result<bool> {
        match self.inner.watches.remove(path) {
            Some((_, registration)) => {
                registration.cancel.cancel();
                self.inner.session.remove_watch(registration.watch_id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.watches.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn watch_count(&self) -> usize {
        self.inner.watches.len()
    }

    pub async fn start_cache(
        &self,
        path: &str,
    ) -> Result<()> {
        self.install_cache(path, None).await
    }

    pub async fn start_cache_with_listener<F>(
        &self,
        path: &str,
        listener: F,
    ) -> Result<()>
    where
        F: Fn(CacheEvent) + Send + Sync + 'static,
    {
        self.install_cache(path, Some(Arc::new(listener))).await
    }

    async fn install_cache(
        &self,
        path: &str,
        listener: Option<CacheListener>,
    ) -> Result<()> {
        path::validate(path)?;
        let cache = LocalCache::start(&self.inner.session, path, listener).await?;
        if let Some(previous) = self.inner.caches.insert(path.to_string(), Arc::new(cache)) {
            debug!(path, "replacing existing local cache");
            if let Err(e) = previous.stop(&self.inner.session).await {
                warn!(path, %e, "failed to stop replaced local cache");
            }
        }
        Ok(())
    }

    /// Stops the cache rooted at `path`. Returns whether one was running.
    pub async fn stop_cache(
        &self,
        path: &str,
    ) -> Result<bool> {
        match self.inner.caches.remove(path) {
            Some((_, cache)) => {
                cache.stop(&self.inner.session).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The cache with the deepest root covering `path`.
    pub fn cache_for(
        &self,
        path: &str,
    ) -> Option<Arc<LocalCache>> {
        self.inner
            .caches
            .iter()
            .filter(|e| e.value().covers(path))
            .max_by_key(|e| e.key().len())
            .map(|e| e.value().clone())
    }

    /// Cached payload for `path`; `None` when no cache covers it or the
    /// cache has no entry.
    pub fn cached_node_data(
        &self,
        path: &str,
    ) -> Option<Vec<u8>> {
        self.cache_for(path).and_then(|cache| cache.get(path))
    }

    /// Drops every watch and cache.
    pub async fn close(&self) {
        let paths = self.watched_paths();
        for path in paths {
            if let Some((_, registration)) = self.inner.watches.remove(&path) {
                self.release(&path, registration).await;
            }
        }
        let roots: Vec<String> = self.inner.caches.iter().map(|e| e.key().clone()).collect();
        for root in roots {
            if let Err(e) = self.stop_cache(&root).await {
                warn!(root = %root, %e, "failed to stop local cache");
            }
        }
    }

    async fn release(
        &self,
        path: &str,
        registration: Registration,
    ) {
        registration.cancel.cancel();
        if self.inner.session.is_closed() {
            return;
        }
        if let Err(e) = self.inner.session.remove_watch(registration.watch_id).await {
            warn!(path, %e, "failed to remove watch");
        }
    }
}

fn spawn_delivery(
    session: Session,
    path: String,
    mut events: mpsc::UnboundedReceiver<WatchedEvent>,
    cancel: CancellationToken,
    handler: EventHandler,
) {
    spawn_task("subtree_watch", move || async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) if event.event_type == EventType::NodeDataChanged => {
                        deliver(&session, &handler, &event).await;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        debug!(path = %path, "subtree watch delivery stopped");
        Ok(())
    });
}

async fn deliver(
    session: &Session,
    handler: &EventHandler,
    event: &WatchedEvent,
) {
    let path = session.relativize(&event.path);
    let payload = match session.get_data(&path).await {
        Ok((data, _)) => data,
        Err(e) if e.is_not_found() => {
            debug!(path = %path, "changed node vanished before it could be read");
            return;
        }
        Err(e) => {
            error!(path = %path, %e, "failed to fetch changed node");
            return;
        }
    };

    WATCH_EVENTS_DELIVERED.with_label_values(&["watch"]).inc();
    let record = EventRecord {
        path: path.clone(),
        payload,
    };
    if catch_unwind(AssertUnwindSafe(|| handler(record))).is_err() {
        error!(path = %path, "watch handler panicked");
    }
}
