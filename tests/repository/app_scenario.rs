use coordkit::CreateMode;
use coordkit::MemoryEnsemble;
use tracing_test::traced_test;

use crate::common::start_client;

#[tokio::test]
#[traced_test]
async fn test_config_node_lifecycle_under_namespace() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let client = start_client(&ensemble, "app").await?;
    let repo = client.repository();

    let created = repo
        .create_node(CreateMode::Persistent, "/config/a", Some(b"v1"))
        .await;
    assert_eq!(created.ok().as_deref(), Some("/config/a"));
    assert_eq!(ensemble.node_data("/app/config/a"), Some(b"v1".to_vec()));

    assert_eq!(repo.get_node_data("/config/a").await.ok(), Some(b"v1".to_vec()));

    assert!(repo.set_node_data("/config/a", b"v2").await.is_ok());
    assert_eq!(repo.get_node_data("/config/a").await.ok(), Some(b"v2".to_vec()));
    assert_eq!(repo.sync_then_get_node_data("/config/a").await.ok(), Some(b"v2".to_vec()));

    assert!(repo.delete("/config/a").await.is_ok());
    assert_eq!(repo.node_exists("/config/a").await.ok(), Some(false));
    assert!(repo.get_node_data("/config/a").await.is_not_found());

    // parent created on the way stays behind
    assert_eq!(repo.node_exists("/config").await.ok(), Some(true));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_clients_with_different_namespaces_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let tenant_a = start_client(&ensemble, "tenant-a").await?;
    let tenant_b = start_client(&ensemble, "tenant-b").await?;

    tenant_a
        .repository()
        .create_node(CreateMode::Persistent, "/settings", Some(b"a"))
        .await;

    assert!(tenant_b.repository().get_node_data("/settings").await.is_not_found());
    assert_eq!(
        tenant_a.repository().get_node_data("/settings").await.ok(),
        Some(b"a".to_vec())
    );
    assert_eq!(ensemble.node_data("/tenant-a/settings"), Some(b"a".to_vec()));

    tenant_a.close().await?;
    tenant_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_recursive_delete_removes_whole_subtree() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let client = start_client(&ensemble, "app").await?;
    let repo = client.repository();

    for path in ["/jobs/a/1", "/jobs/a/2", "/jobs/b", "/keep"] {
        assert!(repo.create_node(CreateMode::Persistent, path, Some(b"x")).await.is_ok());
    }

    assert!(repo.delete("/jobs").await.is_ok());
    assert_eq!(repo.node_exists("/jobs").await.ok(), Some(false));
    assert_eq!(repo.list_children("/").await.ok(), Some(vec!["keep".to_string()]));

    client.close().await?;
    Ok(())
}
