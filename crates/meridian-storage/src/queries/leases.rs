// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conditional writes against `cluster_leases`.
//!
//! Each operation is one statement, so the compare and the swap happen
//! atomically inside SQLite regardless of how many nodes share the file.

use chrono::{DateTime, Utc};
use meridian_core::{Lease, MeridianError, ServerId};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, from_millis, map_tr_err, to_millis};

const LEASE_COLUMNS: &str =
    "resource_id, holder_server_id, acquired_at, expires_at, fencing_token";

fn lease_from_row(row: &Row<'_>) -> rusqlite::Result<Lease> {
    let token: i64 = row.get(4)?;
    Ok(Lease {
        resource_id: row.get(0)?,
        holder_server_id: ServerId(row.get(1)?),
        acquired_at: from_millis(row.get(2)?),
        expires_at: from_millis(row.get(3)?),
        fencing_token: u64::try_from(token).unwrap_or_default(),
    })
}

/// Claims the lease when it is absent, lapsed, or already ours.
///
/// A live lease held by the same server keeps its token and acquisition time
/// and has its expiry pushed out. Any other successful claim bumps the token.
pub async fn try_acquire(
    db: &Database,
    resource_id: &str,
    holder: &ServerId,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Option<Lease>, MeridianError> {
    let resource_id = resource_id.to_string();
    let holder = holder.0.clone();
    let now = to_millis(now);
    let expires_at = to_millis(expires_at);
    db.connection()
        .call(move |conn| -> Result<Option<Lease>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "INSERT INTO cluster_leases ({LEASE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT(resource_id) DO UPDATE SET
                         holder_server_id = excluded.holder_server_id,
                         acquired_at = CASE
                             WHEN cluster_leases.holder_server_id = excluded.holder_server_id
                                  AND cluster_leases.expires_at > ?3
                             THEN cluster_leases.acquired_at
                             ELSE excluded.acquired_at END,
                         fencing_token = CASE
                             WHEN cluster_leases.holder_server_id = excluded.holder_server_id
                                  AND cluster_leases.expires_at > ?3
                             THEN cluster_leases.fencing_token
                             ELSE cluster_leases.fencing_token + 1 END,
                         expires_at = excluded.expires_at
                     WHERE cluster_leases.expires_at <= ?3
                        OR cluster_leases.holder_server_id = excluded.holder_server_id
                     RETURNING {LEASE_COLUMNS}"
                ),
                params![resource_id, holder, now, expires_at],
                lease_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Extends a live lease held by `holder` at exactly `fencing_token`.
pub async fn renew(
    db: &Database,
    resource_id: &str,
    holder: &ServerId,
    fencing_token: u64,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Option<Lease>, MeridianError> {
    let resource_id = resource_id.to_string();
    let holder = holder.0.clone();
    let token = i64::try_from(fencing_token).unwrap_or(i64::MAX);
    let now = to_millis(now);
    let expires_at = to_millis(expires_at);
    db.connection()
        .call(move |conn| -> Result<Option<Lease>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "UPDATE cluster_leases SET expires_at = ?4
                     WHERE resource_id = ?1 AND holder_server_id = ?2
                       AND fencing_token = ?3 AND expires_at > ?5
                     RETURNING {LEASE_COLUMNS}"
                ),
                params![resource_id, holder, token, expires_at, now],
                lease_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Marks the lease lapsed without deleting it, so the token history survives
/// and the next holder still gets a strictly greater token.
pub async fn release(
    db: &Database,
    resource_id: &str,
    holder: &ServerId,
    fencing_token: u64,
) -> Result<bool, MeridianError> {
    let resource_id = resource_id.to_string();
    let holder = holder.0.clone();
    let token = i64::try_from(fencing_token).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE cluster_leases SET expires_at = 0
                 WHERE resource_id = ?1 AND holder_server_id = ?2 AND fencing_token = ?3",
                params![resource_id, holder, token],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, resource_id: &str) -> Result<Option<Lease>, MeridianError> {
    let resource_id = resource_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Lease>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {LEASE_COLUMNS} FROM cluster_leases WHERE resource_id = ?1"),
                params![resource_id],
                lease_from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list(db: &Database) -> Result<Vec<Lease>, MeridianError> {
    db.connection()
        .call(|conn| -> Result<Vec<Lease>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEASE_COLUMNS} FROM cluster_leases ORDER BY resource_id"
            ))?;
            let rows = stmt.query_map([], lease_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
