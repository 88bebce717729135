use std::time::Duration;

use coordkit::CreateMode;
use coordkit::MemoryEnsemble;

use crate::common::eventually;
use crate::common::start_client;

#[tokio::test]
async fn test_cache_follows_changes_made_by_other_clients() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let reader = start_client(&ensemble, "app").await?;
    let writer = start_client(&ensemble, "app").await?;
    let repo = writer.repository();
    repo.create_node(CreateMode::Persistent, "/routes/a", Some(b"10.0.0.1")).await;

    reader.notifications().start_cache("/routes").await?;
    assert_eq!(
        reader.notifications().cached_node_data("/routes/a"),
        Some(b"10.0.0.1".to_vec())
    );

    repo.create_node(CreateMode::Persistent, "/routes/b", Some(b"10.0.0.2")).await;
    repo.set_node_data("/routes/a", b"10.0.0.9").await;
    repo.delete("/routes/b").await;

    let settled = eventually(Duration::from_secs(2), || {
        let reader = reader.clone();
        async move {
            let notifications = reader.notifications();
            notifications.cached_node_data("/routes/a") == Some(b"10.0.0.9".to_vec())
                && notifications.cached_node_data("/routes/b").is_none()
        }
    })
    .await;
    assert!(settled);
    assert_eq!(
        reader.get_cached_node_data("/routes/a").await.ok(),
        Some(b"10.0.0.9".to_vec())
    );

    assert!(reader.notifications().stop_cache("/routes").await?);
    assert!(reader.notifications().cache_for("/routes/a").is_none());

    reader.close().await?;
    writer.close().await?;
    Ok(())
}
