//! the test_utils folder here will share utils or test components between unit
//! tests and integrations tests

mod flaky;

pub use flaky::*;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::BackoffPolicy;
use crate::CoordConfig;
use crate::MemoryEnsemble;
use crate::Session;

/// Short delays so retry paths finish quickly, paused clock or not.
pub fn fast_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 1_000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

pub fn test_config(
    namespace: &str,
    digest: Option<&str>,
) -> CoordConfig {
    let mut config = CoordConfig::default();
    config.session.namespace = namespace.to_string();
    config.session.digest = digest.map(str::to_string);
    config.retry = fast_policy(2);
    config.repository.background_delete_interval_ms = 10;
    config
}

pub async fn memory_session(
    ensemble: &MemoryEnsemble,
    config: &CoordConfig,
) -> Session {
    Session::connect(config, Arc::new(ensemble.clone()))
        .await
        .expect("memory session should connect")
}

/// Session over a [`FlakyCoordinator`] wrapping a fresh memory session.
pub async fn flaky_session(
    ensemble: &MemoryEnsemble,
    config: &CoordConfig,
) -> (Session, Arc<FlakyCoordinator>) {
    let flaky = Arc::new(FlakyCoordinator::new(Arc::new(ensemble.open_session())));
    let session = Session::establish(flaky.clone(), config)
        .await
        .expect("flaky session should establish");
    (session, flaky)
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub async fn wait_until<F, Fut>(
    limit: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
