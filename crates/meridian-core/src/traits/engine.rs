// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine controller trait consumed by the shadow cutover controller.

use async_trait::async_trait;

use crate::error::MeridianError;
use crate::types::{ChannelId, ChannelStatus};

/// Starts, stops and lists deployed channels.
///
/// Every operation may fail with a channel-specific error that callers must
/// surface rather than swallow.
#[async_trait]
pub trait EngineController: Send + Sync + 'static {
    /// Starts a deployed channel's source connector.
    async fn start_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError>;

    /// Stops a running channel. In-flight poll ticks are allowed to finish.
    async fn stop_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError>;

    /// Returns the status of every deployed channel.
    async fn channel_statuses(&self) -> Result<Vec<ChannelStatus>, MeridianError>;

    /// Returns the number of deployed channels.
    async fn deployed_count(&self) -> Result<usize, MeridianError>;
}
