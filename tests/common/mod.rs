use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coordkit::BackoffPolicy;
use coordkit::Client;
use coordkit::CoordConfig;
use coordkit::MemoryEnsemble;

pub const SHORT: Duration = Duration::from_millis(100);
pub const LONG: Duration = Duration::from_secs(5);

pub fn client_config(namespace: &str) -> CoordConfig {
    let mut config = CoordConfig::default();
    config.session.server_addr = "127.0.0.1:2181".to_string();
    config.session.namespace = namespace.to_string();
    config.retry = BackoffPolicy {
        max_retries: 2,
        timeout_ms: 1_000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    config.repository.background_delete_interval_ms = 10;
    config
}

pub async fn start_client(
    ensemble: &MemoryEnsemble,
    namespace: &str,
) -> Result<Client, Box<dyn std::error::Error>> {
    let client = Client::builder(client_config(namespace), Arc::new(ensemble.clone()))
        .build()
        .await?;
    Ok(client)
}

pub async fn start_digest_client(
    ensemble: &MemoryEnsemble,
    namespace: &str,
    credential: &str,
) -> Result<Client, Box<dyn std::error::Error>> {
    let client = Client::builder(client_config(namespace), Arc::new(ensemble.clone()))
        .digest(credential)
        .build()
        .await?;
    Ok(client)
}

pub async fn eventually<F, Fut>(
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
