//! Fixed-size pool of storage connections.
//!
//! Every connection is opened up front. Idle connections sit in a queue whose
//! length always equals the semaphore's permit count, so `get` waits on the
//! semaphore and then pops. Closing the pool closes the semaphore, which wakes
//! every waiter with [`Error::PoolClosed`].

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ragdb_core::traits::{StorageConnection, StorageEngine};
use ragdb_core::{Error, Result};

type Conn = Arc<dyn StorageConnection>;

struct PoolInner {
    uri: String,
    size: usize,
    idle: Mutex<VecDeque<Conn>>,
    available: Semaphore,
    closed: AtomicBool,
    /// Every connection the pool opened, closed once on shutdown.
    owned: Mutex<Vec<Conn>>,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Conn>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owns(&self, conn: &Conn) -> bool {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| Arc::ptr_eq(c, conn))
    }

    fn put(&self, conn: Conn) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        if !self.owns(&conn) {
            return Err(Error::validation("connection was not opened by this pool"));
        }
        let mut idle = self.idle();
        if idle.len() >= self.size {
            return Err(Error::PoolFull);
        }
        if idle.iter().any(|c| Arc::ptr_eq(c, &conn)) {
            return Err(Error::validation("connection is already idle in this pool"));
        }
        idle.push_back(conn);
        drop(idle);
        self.available.add_permits(1);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

async fn close_all(conns: Vec<Conn>) {
    for conn in conns {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close pooled connection");
        }
    }
}

impl ConnectionPool {
    /// Open `size` connections to `uri`. If any fails, the ones already opened are closed.
    pub async fn open(
        engine: &dyn StorageEngine,
        uri: &str,
        size: usize,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("pool size must be positive".into()));
        }
        let mut opened: Vec<Conn> = Vec::with_capacity(size);
        for i in 0..size {
            if cancel.is_cancelled() {
                close_all(opened).await;
                return Err(Error::Cancelled);
            }
            match engine.connect(uri).await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    warn!(uri, index = i, error = %e, "pool connection failed, closing opened connections");
                    close_all(opened).await;
                    return Err(e);
                }
            }
        }
        info!(uri, size, "connection pool ready");
        Ok(Self {
            inner: Arc::new(PoolInner {
                uri: uri.to_string(),
                size,
                idle: Mutex::new(opened.iter().cloned().collect()),
                available: Semaphore::new(size),
                closed: AtomicBool::new(false),
                owned: Mutex::new(opened),
            }),
        })
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Wait for an idle connection. The guard returns it to the pool on drop.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let permit = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.inner.available.acquire() => permit.map_err(|_| Error::PoolClosed)?,
        };
        permit.forget();
        let conn = self.inner.idle().pop_front().ok_or(Error::PoolClosed)?;
        Ok(PooledConnection { conn, pool: self.inner.clone(), detached: false })
    }

    /// Return a connection this pool opened, e.g. one detached with
    /// [`PooledConnection::into_inner`]. Fails if the pool is closed, the
    /// connection is foreign or already idle, or `size` connections are idle.
    pub fn put(&self, conn: Arc<dyn StorageConnection>) -> Result<()> {
        self.inner.put(conn)
    }

    /// Close the pool and every connection it opened. Later calls do nothing.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.available.close();
        self.inner.idle().clear();
        let owned = std::mem::take(&mut *self.inner.owned.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(uri = %self.inner.uri, connections = owned.len(), "closing connection pool");
        close_all(owned).await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Idle connections right now.
    pub fn available(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn health_check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    /// Borrow a connection and list tables through it.
    pub async fn health_check_with_connection(&self, cancel: &CancellationToken) -> Result<()> {
        let conn = self.get(cancel).await?;
        conn.table_names().await?;
        Ok(())
    }
}

/// A checked-out connection. Dropping it puts the connection back.
pub struct PooledConnection {
    conn: Conn,
    pool: Arc<PoolInner>,
    detached: bool,
}

impl PooledConnection {
    pub fn connection(&self) -> &Arc<dyn StorageConnection> {
        &self.conn
    }

    /// Keep the connection instead of returning it. The pool still closes it on shutdown.
    pub fn into_inner(mut self) -> Arc<dyn StorageConnection> {
        self.detached = true;
        self.conn.clone()
    }
}

impl Deref for PooledConnection {
    type Target = dyn StorageConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Err(e) = self.pool.put(self.conn.clone()) {
            debug!(error = %e, "connection not returned to pool");
        }
    }
}
