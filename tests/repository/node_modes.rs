use coordkit::CreateMode;
use coordkit::MemoryEnsemble;

use crate::common::start_client;
use crate::common::start_digest_client;

#[tokio::test]
async fn test_every_create_mode_stores_payload() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let client = start_client(&ensemble, "app").await?;
    let repo = client.repository();

    let modes = [
        (CreateMode::Persistent, "/modes/persistent"),
        (CreateMode::PersistentSequential, "/modes/persistent-seq-"),
        (CreateMode::Ephemeral, "/modes/ephemeral"),
        (CreateMode::EphemeralSequential, "/modes/ephemeral-seq-"),
    ];
    for (mode, path) in modes {
        let created = repo
            .create_node(mode, path, Some(path.as_bytes()))
            .await
            .into_result()?
            .ok_or("node missing")?;
        if mode.is_sequential() {
            assert!(created.starts_with(path));
            assert_eq!(created.len(), path.len() + 10);
        } else {
            assert_eq!(created, path);
        }
        assert_eq!(repo.get_node_data(&created).await.ok(), Some(path.as_bytes().to_vec()));

        let stat = repo
            .node_stat(&created)
            .await
            .into_result()?
            .ok_or("node missing")?;
        assert_eq!(stat.ephemeral_owner != 0, mode.is_ephemeral());
    }

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_sequential_children_sort_in_creation_order() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let client = start_client(&ensemble, "app").await?;
    let repo = client.repository();

    let mut created = Vec::new();
    for _ in 0..12 {
        let path = repo
            .create_node(CreateMode::PersistentSequential, "/queue/item-", None)
            .await
            .into_result()?
            .ok_or("node missing")?;
        created.push(path.trim_start_matches("/queue/").to_string());
    }

    let children = repo
        .list_children("/queue")
        .await
        .into_result()?
        .ok_or("node missing")?;
    assert_eq!(children, created);
    assert_eq!(children.first().map(String::as_str), Some("item-0000000000"));
    assert_eq!(children.last().map(String::as_str), Some("item-0000000011"));

    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_ephemeral_nodes_vanish_with_their_client() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let member = start_client(&ensemble, "app").await?;
    let observer = start_client(&ensemble, "app").await?;

    member
        .repository()
        .create_node(CreateMode::Ephemeral, "/members/worker-1", Some(b"up"))
        .await
        .into_result()?
        .ok_or("node missing")?;
    assert_eq!(
        observer.repository().node_exists("/members/worker-1").await.ok(),
        Some(true)
    );

    member.close().await?;
    assert_eq!(
        observer.repository().node_exists("/members/worker-1").await.ok(),
        Some(false)
    );

    observer.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_digest_nodes_are_hidden_from_other_credentials() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let owner = start_digest_client(&ensemble, "secure", "svc:secret").await?;
    let intruder = start_digest_client(&ensemble, "secure", "other:secret").await?;
    let same_user = start_digest_client(&ensemble, "secure", "svc:secret").await?;

    owner
        .repository()
        .create_node(CreateMode::Persistent, "/vault", Some(b"s3cr3t"))
        .await
        .into_result()?
        .ok_or("node missing")?;

    assert!(intruder.repository().get_node_data("/vault").await.is_failed());
    assert_eq!(
        same_user.repository().get_node_data("/vault").await.ok(),
        Some(b"s3cr3t".to_vec())
    );

    for client in [owner, intruder, same_user] {
        client.close().await?;
    }
    Ok(())
}
