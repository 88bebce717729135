use std::fmt;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::backend::AddWatchMode;
use crate::backend::EventType;
use crate::backend::WatchId;
use crate::metrics::WATCH_EVENTS_DELIVERED;
use crate::utils::async_task::spawn_task;
use crate::utils::path;
use crate::Result;
use crate::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Created,
    Changed,
    Deleted,
}

/// Change applied to a [`LocalCache`].
///
/// A refresh that finds the cached payload unchanged is not reported, so a
/// node picked up by the initial load is announced once as `Created`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub path: String,
    /// New payload, or the last cached one for deletions
    pub payload: Option<Vec<u8>>,
}

pub type CacheListener = Arc<dyn Fn(CacheEvent) + Send + Sync>;

/// Eventually consistent mirror of a subtree.
///
/// The watch is registered before the initial load so no change between the
/// two is missed; events are then applied in order by one background task.
pub struct LocalCache {
    root: String,
    entries: Arc<DashMap<String, Vec<u8>>>,
    watch_id: WatchId,
    cancel: CancellationToken,
}

impl fmt::Debug for LocalCache {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("root", &self.root)
            .field("entries", &self.entries.len())
            .field("watch_id", &self.watch_id)
            .finish()
    }
}

impl LocalCache {
    pub(crate) async fn start(
        session: &Session,
        root: &str,
        listener: Option<CacheListener>,
    ) -> Result<LocalCache> {
        let mut registration = session.add_watch(root, AddWatchMode::PersistentRecursive).await?;
        let entries = Arc::new(DashMap::new());
        let cancel = session.shutdown_token().child_token();
        let mirror = Mirror {
            session: session.clone(),
            entries: entries.clone(),
            listener,
        };

        if let Err(e) = mirror.load(root).await {
            if let Err(remove_err) = session.remove_watch(registration.id).await {
                warn!(root, %remove_err, "failed to remove watch of aborted cache");
            }
            return Err(e);
        }
        debug!(root, entries = entries.len(), "local cache loaded");

        let task_cancel = cancel.clone();
        let task_root = root.to_string();
        spawn_task("local_cache", move || async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = registration.events.recv() => match event {
                        Some(event) => {
                            let relative = mirror.session.relativize(&event.path);
                            mirror.apply(event.event_type, &relative).await;
                        }
                        None => break,
                    },
                }
            }
            debug!(root = %task_root, "local cache stopped");
            Ok(())
        });

        Ok(LocalCache {
            root: root.to_string(),
            entries,
            watch_id: registration.id,
            cancel,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether `path` lies inside the mirrored subtree.
    pub fn covers(
        &self,
        path: &str,
    ) -> bool {
        path::is_ancestor_or_self(&self.root, path)
    }

    pub fn get(
        &self,
        path: &str,
    ) -> Option<Vec<u8>> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub(crate) async fn stop(
        &self,
        session: &Session,
    ) -> Result<()> {
        self.cancel.cancel();
        self.entries.clear();
        session.remove_watch(self.watch_id).await
    }
}

pub(super) struct Mirror {
    pub(super) session: Session,
    pub(super) entries: Arc<DashMap<String, Vec<u8>>>,
    pub(super) listener: Option<CacheListener>,
}

impl Mirror {
    /// Breadth-first copy of the subtree. A missing root leaves the cache empty.
    pub(super) async fn load(
        &self,
        root: &str,
    ) -> Result<()> {
        let mut pending = vec![root.to_string()];
        while let Some(current) = pending.pop() {
            match self.session.get_data(&current).await {
                Ok((data, _)) => {
                    let previous = self.entries.insert(current.clone(), data.clone());
                    let kind = if previous.is_some() {
                        CacheEventKind::Changed
                    } else {
                        CacheEventKind::Created
                    };
                    self.notify(kind, &current, Some(data));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
            match self.session.get_children(&current).await {
                Ok(children) => pending.extend(children.iter().map(|c| path::join(&current, c))),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub(super) async fn apply(
        &self,
        event_type: EventType,
        path: &str,
    ) {
        trace!(path, ?event_type, "cache event");
        match event_type {
            EventType::NodeCreated | EventType::NodeDataChanged => self.refresh(path).await,
            EventType::NodeDeleted => self.evict(path),
            EventType::NodeChildrenChanged => {}
        }
    }

    async fn refresh(
        &self,
        path: &str,
    ) {
        match self.session.get_data(path).await {
            Ok((data, _)) => match self.entries.insert(path.to_string(), data.clone()) {
                // events queued during the initial load replay what it already saw
                Some(previous) if previous == data => trace!(path, "cached node unchanged"),
                Some(_) => self.notify(CacheEventKind::Changed, path, Some(data)),
                None => self.notify(CacheEventKind::Created, path, Some(data)),
            },
            // deleted again before we could read it, the delete event follows
            Err(e) if e.is_not_found() => self.evict(path),
            Err(e) => warn!(path, %e, "failed to refresh cached node"),
        }
    }

    fn evict(
        &self,
        path: &str,
    ) {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| path::is_ancestor_or_self(path, e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in doomed {
            if let Some((key, last)) = self.entries.remove(&key) {
                self.notify(CacheEventKind::Deleted, &key, Some(last));
            }
        }
    }

    fn notify(
        &self,
        kind: CacheEventKind,
        path: &str,
        payload: Option<Vec<u8>>,
    ) {
        WATCH_EVENTS_DELIVERED.with_label_values(&["cache"]).inc();
        let Some(listener) = &self.listener else {
            return;
        };
        let event = CacheEvent {
            kind,
            path: path.to_string(),
            payload,
        };
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            error!(path, ?kind, "cache listener panicked");
        }
    }
}
