// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server registry operations.

use std::str::FromStr;

use meridian_core::{MeridianError, ServerId, ServerStatus};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err, to_millis};

/// Inserts or overwrites the registry row for `server_id`.
pub async fn upsert_status(
    db: &Database,
    server_id: &ServerId,
    status: ServerStatus,
) -> Result<(), MeridianError> {
    let server_id = server_id.0.clone();
    let status = status.to_string();
    let now = to_millis(chrono::Utc::now());
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO server_registry (server_id, status, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(server_id) DO UPDATE SET
                     status = excluded.status,
                     updated_at = excluded.updated_at",
                params![server_id, status, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_status(
    db: &Database,
    server_id: &ServerId,
) -> Result<Option<ServerStatus>, MeridianError> {
    let server_id = server_id.0.clone();
    let raw = db
        .connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT status FROM server_registry WHERE server_id = ?1",
                params![server_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)?;

    raw.map(|s| {
        ServerStatus::from_str(&s).map_err(|e| MeridianError::Storage {
            source: format!("unrecognized server status `{s}`: {e}").into(),
        })
    })
    .transpose()
}
