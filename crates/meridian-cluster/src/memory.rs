// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process lease store.
//!
//! Same acquire/renew/release rules as the SQLite store, guarded by one mutex.
//! Useful for single-node deployments and for simulating several nodes in one
//! test process. [`InMemoryLeaseStore::set_available`] simulates an outage.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::traits::lease::ttl_to_chrono;
use meridian_core::{Lease, LeaseStore, MeridianError, ServerId};

#[derive(Debug)]
pub struct InMemoryLeaseStore {
    leases: Mutex<BTreeMap<String, Lease>>,
    available: AtomicBool,
}

impl Default for InMemoryLeaseStore {
    fn default() -> Self {
        Self {
            leases: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, every operation fails with a storage error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Lease>>, MeridianError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MeridianError::Storage {
                source: "lease store unavailable".into(),
            });
        }
        Ok(self.leases.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        resource_id: &str,
        holder: &ServerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError> {
        let mut leases = self.check()?;
        let expires_at = now + ttl_to_chrono(ttl);
        let next = match leases.get(resource_id) {
            None => Lease {
                resource_id: resource_id.to_string(),
                holder_server_id: holder.clone(),
                acquired_at: now,
                expires_at,
                fencing_token: 1,
            },
            Some(current) if current.is_held_by(holder, now) => Lease {
                expires_at,
                ..current.clone()
            },
            Some(current) if current.is_expired_at(now) => Lease {
                resource_id: resource_id.to_string(),
                holder_server_id: holder.clone(),
                acquired_at: now,
                expires_at,
                fencing_token: current.fencing_token + 1,
            },
            Some(_) => return Ok(None),
        };
        leases.insert(resource_id.to_string(), next.clone());
        Ok(Some(next))
    }

    async fn renew(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError> {
        let mut leases = self.check()?;
        match leases.get_mut(resource_id) {
            Some(lease) if lease.fencing_token == fencing_token && lease.is_held_by(holder, now) => {
                lease.expires_at = now + ttl_to_chrono(ttl);
                Ok(Some(lease.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
    ) -> Result<bool, MeridianError> {
        let mut leases = self.check()?;
        match leases.get_mut(resource_id) {
            Some(lease)
                if &lease.holder_server_id == holder && lease.fencing_token == fencing_token =>
            {
                lease.expires_at = DateTime::<Utc>::UNIX_EPOCH;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, resource_id: &str) -> Result<Option<Lease>, MeridianError> {
        Ok(self.check()?.get(resource_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Lease>, MeridianError> {
        Ok(self.check()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn follows_the_lease_rules() {
        let store = InMemoryLeaseStore::new();
        let a = ServerId::from("node-a");
        let b = ServerId::from("node-b");
        let now = Utc::now();

        let held = store.try_acquire("r", &a, TTL, now).await.unwrap().unwrap();
        assert_eq!(held.fencing_token, 1);
        assert!(store.try_acquire("r", &b, TTL, now).await.unwrap().is_none());

        let later = held.expires_at;
        let taken = store.try_acquire("r", &b, TTL, later).await.unwrap().unwrap();
        assert_eq!(taken.fencing_token, 2);
        assert!(store.renew("r", &a, 1, TTL, later).await.unwrap().is_none());

        assert!(store.release("r", &b, 2).await.unwrap());
        let again = store.try_acquire("r", &a, TTL, later).await.unwrap().unwrap();
        assert_eq!(again.fencing_token, 3);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemoryLeaseStore::new();
        store.set_available(false);
        let err = store
            .try_acquire("r", &ServerId::from("a"), TTL, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MeridianError::Storage { .. }));
    }
}
