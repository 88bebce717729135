use std::sync::Arc;
use std::time::Duration;

use coordkit::CreateMode;
use coordkit::EventRecord;
use coordkit::MemoryEnsemble;
use parking_lot::Mutex;
use tracing_test::traced_test;

use crate::common::eventually;
use crate::common::start_client;

#[tokio::test]
#[traced_test]
async fn test_one_event_per_data_change_from_another_client() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let watcher = start_client(&ensemble, "app").await?;
    let writer = start_client(&ensemble, "app").await?;
    writer
        .repository()
        .create_node(CreateMode::Persistent, "/config/db/url", Some(b"v0"))
        .await;

    let received: Arc<Mutex<Vec<EventRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    watcher
        .notifications()
        .watch_subtree("/config", move |record| sink.lock().push(record))
        .await?;

    let repo = writer.repository();
    assert!(repo.set_node_data("/config/db/url", b"v1").await.is_ok());
    assert!(eventually(Duration::from_secs(2), || {
        let received = received.clone();
        async move { received.lock().len() == 1 }
    })
    .await);
    assert!(repo.set_node_data("/config/db/url", b"v2").await.is_ok());
    assert!(eventually(Duration::from_secs(2), || {
        let received = received.clone();
        async move { received.lock().len() == 2 }
    })
    .await);

    // creations, deletions and changes outside the subtree are not data changes
    repo.create_node(CreateMode::Persistent, "/config/new", Some(b"n")).await;
    repo.set_node_data("/elsewhere", b"x").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let records = received.lock().clone();
    assert_eq!(
        records,
        vec![
            EventRecord {
                path: "/config/db/url".to_string(),
                payload: b"v1".to_vec(),
            },
            EventRecord {
                path: "/config/db/url".to_string(),
                payload: b"v2".to_vec(),
            },
        ]
    );

    watcher.close().await?;
    writer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_unwatch_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let client = start_client(&ensemble, "app").await?;
    let repo = client.repository();
    repo.create_node(CreateMode::Persistent, "/flags/beta", Some(b"off")).await;

    let received: Arc<Mutex<Vec<EventRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client
        .notifications()
        .watch_subtree("/flags", move |record| sink.lock().push(record))
        .await?;
    assert!(client.notifications().unwatch("/flags").await?);
    assert_eq!(ensemble.watch_count(), 0);

    repo.set_node_data("/flags/beta", b"on").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(received.lock().is_empty());

    client.close().await?;
    Ok(())
}
