// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded pool of SQLite connections for one connector.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use meridian_core::MeridianError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Where the connector reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `sqlite::memory:`. Every connection gets its own private database.
    Memory,
    /// `sqlite://<path>` or a bare filesystem path.
    File(PathBuf),
}

impl DatabaseUrl {
    /// Parses a connector URL. Unsupported schemes are configuration errors.
    pub fn parse(url: &str) -> Result<Self, MeridianError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MeridianError::Config("database url is empty".into()));
        }
        if url == "sqlite::memory:" || url == ":memory:" {
            return Ok(Self::Memory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(MeridianError::Config(format!("database url '{url}' has no path")));
            }
            return Ok(Self::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(MeridianError::Config(format!(
                "unsupported database url scheme '{scheme}' (expected sqlite://)"
            )));
        }
        Ok(Self::File(PathBuf::from(url)))
    }

    async fn open(&self) -> Result<tokio_rusqlite::Connection, MeridianError> {
        let conn = match self {
            Self::Memory => tokio_rusqlite::Connection::open_in_memory().await,
            Self::File(path) => tokio_rusqlite::Connection::open(path.clone()).await,
        }
        .map_err(|e| MeridianError::Storage {
            source: Box::new(e),
        })?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch("PRAGMA busy_timeout = 5000;")
        })
        .await
        .map_err(|e| MeridianError::Storage {
            source: Box::new(e),
        })?;
        Ok(conn)
    }
}

struct PoolInner {
    url: DatabaseUrl,
    idle: Mutex<Vec<tokio_rusqlite::Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// A fixed-size connection pool. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Opens the pool, establishing one connection up front so that a bad
    /// path fails at deploy time rather than on the first tick.
    pub async fn open(url: DatabaseUrl, size: usize) -> Result<Self, MeridianError> {
        let size = size.max(1);
        let first = url.open().await?;
        debug!(?url, size, "connection pool opened");
        Ok(Self {
            inner: Arc::new(PoolInner {
                url,
                idle: Mutex::new(vec![first]),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Waits for a free slot and hands out a connection, opening a new one
    /// when no idle connection is available.
    pub async fn acquire(&self) -> Result<PooledConnection, MeridianError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| MeridianError::Internal("connection pool is closed".into()))?;
        let idle = self.lock_idle().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.inner.url.open().await?,
        };
        Ok(PooledConnection {
            conn,
            pool: Arc::clone(&self.inner),
            recycle: true,
            _permit: permit,
        })
    }

    /// Refuses further acquisitions and closes idle connections. Connections
    /// still checked out are closed when they are returned.
    pub async fn close(&self) {
        self.inner.permits.close();
        let idle: Vec<_> = std::mem::take(&mut *self.lock_idle());
        for conn in idle {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "error closing pooled connection");
            }
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<tokio_rusqlite::Connection>> {
        self.inner.idle.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A connection checked out of a [`ConnectionPool`]. Returned on drop
/// unless [`discard`](Self::discard)ed.
pub struct PooledConnection {
    conn: tokio_rusqlite::Connection,
    pool: Arc<PoolInner>,
    recycle: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Gives the slot back without returning the connection to the idle list.
    /// The next acquire in this slot opens a fresh connection.
    pub fn discard(mut self) {
        self.recycle = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.recycle || self.pool.permits.is_closed() {
            return;
        }
        // Clones share the underlying connection.
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(self.conn.clone());
    }
}
