use std::sync::Arc;

use coordkit::Client;
use coordkit::CoordConfig;
use coordkit::CreateMode;
use coordkit::FailurePolicy;
use coordkit::MemoryEnsemble;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_client_starts_from_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("coordkit.toml");
    std::fs::write(
        &path,
        r#"
        [session]
        server_addr = "zk1:2181,zk2:2181"
        namespace = "orders"

        [retry]
        max_retries = 1
        base_delay_ms = 1
        max_delay_ms = 2

        [repository]
        read_failure_policy = "neutralize"
        "#,
    )?;

    let config = CoordConfig::default()
        .with_override_config(path.to_str().ok_or("non utf-8 path")?)?
        .validate()?;
    assert_eq!(config.repository.read_failure_policy, FailurePolicy::Neutralize);

    let ensemble = MemoryEnsemble::new();
    let client = Client::builder(config, Arc::new(ensemble.clone())).build().await?;
    client
        .repository()
        .create_node(CreateMode::Persistent, "/pending", Some(b"1"))
        .await;
    assert_eq!(ensemble.node_data("/orders/pending"), Some(b"1".to_vec()));

    // neutralized reads turn service failures into "not found"
    ensemble.fail_next_operations(10);
    assert!(client.repository().get_node_data("/pending").await.is_not_found());

    client.close().await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_disabled_config_skips_startup() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CoordConfig::default();
    config.enable = false;

    let ensemble = MemoryEnsemble::new();
    let started = Client::builder(config, Arc::new(ensemble.clone()))
        .start_if_enabled()
        .await?;
    assert!(started.is_none());
    assert_eq!(ensemble.connect_count(), 0);
    Ok(())
}
