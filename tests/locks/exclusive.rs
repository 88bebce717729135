use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use coordkit::MemoryEnsemble;

use crate::common::start_client;
use crate::common::LONG;
use crate::common::SHORT;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_lock_across_clients_serializes_increments() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(start_client(&ensemble, "app").await?);
    }
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for (i, client) in clients.iter().enumerate() {
        let client = client.clone();
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        tasks.push(tokio::spawn(async move {
            let mut done = 0;
            for _ in 0..5 {
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                let ran = client
                    .locks()
                    .with_exclusive_lock("/locks/counter", LONG, move || async move {
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await;
                if matches!(ran, Ok(Some(owner)) if owner == i) {
                    done += 1;
                }
            }
            done
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await?;
    }
    assert_eq!(total, 20);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    for client in clients {
        client.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_lock_timeout_returns_none_while_other_client_holds() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let holder = start_client(&ensemble, "app").await?;
    let contender = start_client(&ensemble, "app").await?;

    let lock = holder.locks().mutex("/locks/deploy")?;
    assert!(lock.acquire(SHORT).await?);

    let blocked = contender
        .locks()
        .with_exclusive_lock("/locks/deploy", SHORT, || async { "deployed" })
        .await?;
    assert_eq!(blocked, None);

    lock.release().await?;
    let granted = contender
        .locks()
        .with_exclusive_lock("/locks/deploy", SHORT, || async { "deployed" })
        .await?;
    assert_eq!(granted, Some("deployed"));

    holder.close().await?;
    contender.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_expired_holder_session_hands_lock_to_waiter() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let holder = start_client(&ensemble, "app").await?;
    let waiter = start_client(&ensemble, "app").await?;

    let held = holder.locks().mutex("/locks/leader")?;
    assert!(held.acquire(SHORT).await?);

    let pending = {
        let waiter = waiter.clone();
        tokio::spawn(async move {
            waiter
                .locks()
                .with_exclusive_lock("/locks/leader", LONG, || async { "leader" })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    ensemble.expire_session(holder.session().session_id());
    assert_eq!(pending.await??, Some("leader"));

    waiter.close().await?;
    Ok(())
}
