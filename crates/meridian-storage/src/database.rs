// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Every conditional write in `queries` relies on that: do not open a second
//! writer connection to the same file from this process.

use meridian_config::model::StorageConfig;
use meridian_core::MeridianError;
use tracing::debug;

use crate::migrations::run_migrations;

/// Handle to the coordination database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path`, applies pragmas and
    /// runs pending migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, MeridianError> {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| MeridianError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_tr_err)?;

        conn.call(move |conn| -> Result<(), MeridianError> {
            let journal = if wal_mode { "WAL" } else { "DELETE" };
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {journal};
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;"
            ))
            .map_err(|e| MeridianError::Storage {
                source: Box::new(e),
            })?;
            run_migrations(conn)
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, wal_mode, "coordination database opened");
        Ok(Self { conn })
    }

    pub async fn open_with_config(config: &StorageConfig) -> Result<Self, MeridianError> {
        Self::open(&config.database_path, config.wal_mode).await
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL so the file is self-contained after shutdown.
    pub async fn checkpoint(&self) -> Result<(), MeridianError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Runs a trivial query to confirm the connection is alive.
    pub async fn ping(&self) -> Result<(), MeridianError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Wraps a tokio-rusqlite call failure as a storage error.
pub(crate) fn map_tr_err<E>(e: E) -> MeridianError
where
    E: std::error::Error + Send + Sync + 'static,
{
    MeridianError::Storage {
        source: Box::new(e),
    }
}

/// Milliseconds since the Unix epoch, the on-disk timestamp representation.
pub(crate) fn to_millis(at: chrono::DateTime<chrono::Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
