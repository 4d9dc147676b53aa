use std::sync::Arc;
use std::time::Duration;

use ragdb_core::traits::StorageEngine;
use ragdb_core::{CancellationToken, Error};
use ragdb_vector::{ConnectionPool, MemoryEngine};

const URI: &str = "memory://pool";

#[tokio::test]
async fn pool_prepopulates_and_recycles() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 2, &cancel).await?;

    assert_eq!(engine.stats().connects(), 2, "connections opened up front");
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.available(), 2);

    {
        let a = pool.get(&cancel).await?;
        let _b = pool.get(&cancel).await?;
        assert_eq!(pool.available(), 0);
        a.table_names().await?;
    }
    assert_eq!(pool.available(), 2, "guards return connections on drop");
    Ok(())
}

#[tokio::test]
async fn get_waits_for_a_returned_connection() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 1, &cancel).await?;

    let held = pool.get(&cancel).await?;
    let waiter = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.get(&cancel).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "blocked while the only connection is out");

    drop(held);
    tokio::time::timeout(Duration::from_secs(2), waiter).await???;
    Ok(())
}

#[tokio::test]
async fn get_unblocks_on_cancel_and_on_close() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 1, &cancel).await?;
    let _held = pool.get(&cancel).await?;

    let caller = CancellationToken::new();
    caller.cancel();
    assert!(matches!(pool.get(&caller).await, Err(Error::Cancelled)));

    let waiter = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.get(&cancel).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.close().await?;
    let res = tokio::time::timeout(Duration::from_secs(2), waiter).await??;
    assert!(matches!(res, Err(Error::PoolClosed)));
    Ok(())
}

#[tokio::test]
async fn put_rejects_full_and_closed_pools() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 2, &cancel).await?;

    let detached = pool.get(&cancel).await?.into_inner();
    assert_eq!(pool.available(), 1);
    let idle = pool.get(&cancel).await?.connection().clone();
    assert_eq!(pool.available(), 1, "guard dropped, connection back");
    assert!(matches!(pool.put(idle), Err(Error::Validation(_))), "already idle");

    pool.put(detached.clone())?;
    assert_eq!(pool.available(), 2);
    assert!(matches!(pool.put(detached.clone()), Err(Error::PoolFull)));

    pool.close().await?;
    assert!(matches!(pool.put(detached), Err(Error::PoolClosed)));
    assert!(matches!(pool.get(&cancel).await, Err(Error::PoolClosed)));
    assert!(pool.health_check().is_err());
    Ok(())
}

#[tokio::test]
async fn foreign_connections_are_refused() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 1, &cancel).await?;

    let guard = pool.get(&cancel).await?;
    let original = guard.connection().clone();
    let foreign = engine.connect(URI).await?;
    assert!(matches!(pool.put(foreign.clone()), Err(Error::Validation(_))));
    drop(guard);

    let again = pool.get(&cancel).await?;
    assert!(Arc::ptr_eq(again.connection(), &original), "the pool's own connection stays in rotation");
    drop(again);

    pool.close().await?;
    assert_eq!(engine.stats().close_calls(), 1, "only the pool's connection is closed by the pool");
    foreign.close().await?;
    assert_eq!(engine.stats().close_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn close_closes_each_connection_once() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 3, &cancel).await?;
    let checked_out = pool.get(&cancel).await?;

    pool.close().await?;
    pool.close().await?;
    drop(checked_out);

    assert_eq!(engine.stats().close_calls(), 3, "every connection closed exactly once");
    Ok(())
}

#[tokio::test]
async fn failed_construction_closes_opened_connections() {
    let engine = MemoryEngine::new();
    engine.limit_connects(2);
    let cancel = CancellationToken::new();

    let err = ConnectionPool::open(&engine, URI, 3, &cancel).await.err().expect("third connect fails");
    assert!(matches!(err, Error::Storage { .. }), "{err}");
    assert_eq!(engine.stats().connects(), 2);
    assert_eq!(engine.stats().close_calls(), 2, "partially built pool cleaned up");
}

#[tokio::test]
async fn zero_size_pool_is_rejected() {
    let engine = MemoryEngine::new();
    let res = ConnectionPool::open(&engine, URI, 0, &CancellationToken::new()).await;
    assert!(matches!(res, Err(Error::InvalidConfig(_))));
}

#[tokio::test]
async fn health_check_uses_a_connection() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let pool = ConnectionPool::open(&engine, URI, 1, &cancel).await?;
    pool.health_check()?;
    pool.health_check_with_connection(&cancel).await?;
    assert_eq!(pool.available(), 1);
    Ok(())
}
