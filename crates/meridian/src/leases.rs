// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `meridian leases` command implementation.
//!
//! Reads the lease table straight from the coordination database, so it works
//! whether or not an engine is running on this host.

use chrono::{DateTime, Utc};
use meridian_config::MeridianConfig;
use meridian_core::{Lease, LeaseStore, MeridianError};
use meridian_storage::{Database, SqliteLeaseStore};

pub async fn run_leases(config: &MeridianConfig, json: bool) -> Result<(), MeridianError> {
    let db = Database::open_with_config(&config.storage).await?;
    let leases = SqliteLeaseStore::new(db).list().await?;

    if json {
        let rendered = serde_json::to_string_pretty(&leases)
            .map_err(|e| MeridianError::Internal(format!("failed to render leases: {e}")))?;
        println!("{rendered}");
    } else {
        print!("{}", render_table(&leases, Utc::now()));
    }
    Ok(())
}

/// One line per lease; expired leases are marked so operators can tell a
/// released lease from a held one.
fn render_table(leases: &[Lease], now: DateTime<Utc>) -> String {
    if leases.is_empty() {
        return "no leases recorded\n".to_string();
    }
    let mut out = format!(
        "{:<24} {:<24} {:>6}  {:<8} {}\n",
        "RESOURCE", "HOLDER", "TOKEN", "STATE", "EXPIRES"
    );
    for lease in leases {
        let state = if lease.is_expired_at(now) {
            "expired"
        } else {
            "held"
        };
        out.push_str(&format!(
            "{:<24} {:<24} {:>6}  {:<8} {}\n",
            lease.resource_id,
            lease.holder_server_id,
            lease.fencing_token,
            state,
            lease.expires_at.to_rfc3339()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meridian_core::ServerId;

    #[test]
    fn marks_expired_leases() {
        let now = Utc::now();
        let lease = |id: &str, expires_at| Lease {
            resource_id: id.into(),
            holder_server_id: ServerId::from("node-a"),
            acquired_at: now - Duration::seconds(60),
            expires_at,
            fencing_token: 3,
        };
        let table = render_table(
            &[
                lease("adt-in", now + Duration::seconds(20)),
                lease("lab-out", DateTime::<Utc>::UNIX_EPOCH),
            ],
            now,
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("adt-in") && lines[1].contains("held"));
        assert!(lines[2].starts_with("lab-out") && lines[2].contains("expired"));
    }

    #[test]
    fn empty_inventory() {
        assert_eq!(render_table(&[], Utc::now()), "no leases recorded\n");
    }
}
