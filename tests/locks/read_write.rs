use std::sync::Arc;
use std::time::Duration;

use coordkit::MemoryEnsemble;

use crate::common::start_client;
use crate::common::LONG;
use crate::common::SHORT;

#[tokio::test]
async fn test_readers_on_different_clients_share_the_lock() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let a = start_client(&ensemble, "app").await?;
    let b = start_client(&ensemble, "app").await?;

    let a_rw = a.locks().read_write_lock("/locks/catalog")?;
    let b_rw = b.locks().read_write_lock("/locks/catalog")?;

    assert!(a_rw.read_lock().acquire(SHORT).await?);
    assert!(b_rw.read_lock().acquire(SHORT).await?);
    assert_eq!(a_rw.read_lock().participant_nodes().await?.len(), 2);

    a_rw.read_lock().release().await?;
    b_rw.read_lock().release().await?;

    a.close().await?;
    b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_writer_waits_for_readers_then_blocks_new_ones() -> Result<(), Box<dyn std::error::Error>> {
    let ensemble = MemoryEnsemble::new();
    let reader = start_client(&ensemble, "app").await?;
    let writer = start_client(&ensemble, "app").await?;

    let read_side = reader.locks().read_write_lock("/locks/catalog")?;
    let write_side = Arc::new(writer.locks().read_write_lock("/locks/catalog")?);

    assert!(read_side.read_lock().acquire(SHORT).await?);
    let pending_write = {
        let write_side = write_side.clone();
        tokio::spawn(async move { write_side.write_lock().acquire(LONG).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending_write.is_finished());

    read_side.read_lock().release().await?;
    assert!(pending_write.await??);

    assert!(!read_side.read_lock().acquire(SHORT).await?);
    write_side.write_lock().release().await?;
    assert!(read_side.read_lock().acquire(SHORT).await?);
    read_side.read_lock().release().await?;

    reader.close().await?;
    writer.close().await?;
    Ok(())
}
