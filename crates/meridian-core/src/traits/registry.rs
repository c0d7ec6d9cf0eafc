// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted server registry.

use async_trait::async_trait;

use crate::error::MeridianError;
use crate::types::{ServerId, ServerStatus};

#[async_trait]
pub trait ServerRegistry: Send + Sync + 'static {
    /// Registers the server, overwriting any previous status.
    async fn register(&self, server_id: &ServerId, status: ServerStatus)
    -> Result<(), MeridianError>;

    async fn set_status(
        &self,
        server_id: &ServerId,
        status: ServerStatus,
    ) -> Result<(), MeridianError>;

    async fn status(&self, server_id: &ServerId) -> Result<Option<ServerStatus>, MeridianError>;
}
