// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared coordination store for cluster leases.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MeridianError;
use crate::types::ServerId;

/// A cluster-wide exclusivity record for one pollable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub resource_id: String,
    pub holder_server_id: ServerId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fencing_token: u64,
}

impl Lease {
    /// A lease is expired once `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, server_id: &ServerId, now: DateTime<Utc>) -> bool {
        &self.holder_server_id == server_id && !self.is_expired_at(now)
    }
}

/// Converts a TTL into a chrono duration, saturating on overflow.
pub fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// Checks a fencing token against the live lease before a side-effecting write.
///
/// Returns [`MeridianError::StaleFencingToken`] when another holder has
/// acquired the resource since the token was issued, and
/// [`MeridianError::LeaseLost`] when the lease lapsed or was never held.
#[async_trait]
pub trait FencingValidator: Send + Sync + 'static {
    async fn validate(&self, fencing_token: u64) -> Result<(), MeridianError>;
}

/// Atomic conditional writes against the lease table.
///
/// Every method is a single compare-and-swap: implementations must never let two
/// holders observe success for the same resource at the same fencing token.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Claims the lease if it is unleased, expired, or already held by `holder`.
    ///
    /// Returns the lease when `holder` holds it after the call, `None` when
    /// another holder's lease is still live. The fencing token increments
    /// whenever ownership changes hands or a lapsed lease is re-acquired.
    async fn try_acquire(
        &self,
        resource_id: &str,
        holder: &ServerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError>;

    /// Extends the lease if `holder` still holds it at `fencing_token` and it has
    /// not lapsed. Returns `None` when the lease was lost.
    async fn renew(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError>;

    /// Gives up the lease early. Returns false when it was no longer held.
    async fn release(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
    ) -> Result<bool, MeridianError>;

    async fn get(&self, resource_id: &str) -> Result<Option<Lease>, MeridianError>;

    /// All lease records, ordered by resource id.
    async fn list(&self) -> Result<Vec<Lease>, MeridianError>;
}
