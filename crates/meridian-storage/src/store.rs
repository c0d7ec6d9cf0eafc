// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementations of the core coordination traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::traits::lease::ttl_to_chrono;
use meridian_core::{Lease, LeaseStore, MeridianError, ServerId, ServerRegistry, ServerStatus};

use crate::database::Database;
use crate::queries;

/// Lease table in the shared coordination database.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    db: Database,
}

impl SqliteLeaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn try_acquire(
        &self,
        resource_id: &str,
        holder: &ServerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError> {
        let expires_at = now + ttl_to_chrono(ttl);
        queries::leases::try_acquire(&self.db, resource_id, holder, now, expires_at).await
    }

    async fn renew(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, MeridianError> {
        let expires_at = now + ttl_to_chrono(ttl);
        queries::leases::renew(&self.db, resource_id, holder, fencing_token, now, expires_at).await
    }

    async fn release(
        &self,
        resource_id: &str,
        holder: &ServerId,
        fencing_token: u64,
    ) -> Result<bool, MeridianError> {
        queries::leases::release(&self.db, resource_id, holder, fencing_token).await
    }

    async fn get(&self, resource_id: &str) -> Result<Option<Lease>, MeridianError> {
        queries::leases::get(&self.db, resource_id).await
    }

    async fn list(&self) -> Result<Vec<Lease>, MeridianError> {
        queries::leases::list(&self.db).await
    }
}

/// Server registry in the shared coordination database.
#[derive(Clone)]
pub struct SqliteServerRegistry {
    db: Database,
}

impl SqliteServerRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ServerRegistry for SqliteServerRegistry {
    async fn register(
        &self,
        server_id: &ServerId,
        status: ServerStatus,
    ) -> Result<(), MeridianError> {
        queries::servers::upsert_status(&self.db, server_id, status).await
    }

    async fn set_status(
        &self,
        server_id: &ServerId,
        status: ServerStatus,
    ) -> Result<(), MeridianError> {
        queries::servers::upsert_status(&self.db, server_id, status).await
    }

    async fn status(&self, server_id: &ServerId) -> Result<Option<ServerStatus>, MeridianError> {
        queries::servers::get_status(&self.db, server_id).await
    }
}
