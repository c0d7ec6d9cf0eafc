// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel controller for shadow-mode and gateway tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use meridian_core::{ChannelId, ChannelState, ChannelStatus, EngineController, MeridianError};

use crate::journal::Journal;

/// Tracks channel states in memory. Starts can be made to fail per channel.
///
/// Every start and stop is written to the journal as `start:<id>` / `stop:<id>`.
#[derive(Default)]
pub struct MockEngineController {
    channels: Mutex<BTreeMap<ChannelId, ChannelStatus>>,
    start_failures: Mutex<HashMap<ChannelId, String>>,
    journal: Journal,
}

impl MockEngineController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, id: &str, state: ChannelState) -> Self {
        let channel_id = ChannelId::from(id);
        lock(&self.channels).insert(
            channel_id.clone(),
            ChannelStatus {
                channel_id,
                name: id.to_string(),
                state,
            },
        );
        self
    }

    /// Starting `id` fails with `message` until [`clear_failures`](Self::clear_failures).
    pub fn fail_start(&self, id: &str, message: impl Into<String>) {
        lock(&self.start_failures).insert(ChannelId::from(id), message.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.start_failures).clear();
    }

    pub fn state_of(&self, id: &str) -> Option<ChannelState> {
        lock(&self.channels).get(&ChannelId::from(id)).map(|s| s.state)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

#[async_trait]
impl EngineController for MockEngineController {
    async fn start_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        self.journal.record(format!("start:{channel_id}"));
        if let Some(message) = lock(&self.start_failures).get(channel_id) {
            return Err(MeridianError::ChannelStart {
                channel_id: channel_id.clone(),
                message: message.clone(),
            });
        }
        let mut channels = lock(&self.channels);
        let status = channels
            .get_mut(channel_id)
            .ok_or_else(|| MeridianError::ChannelNotFound(channel_id.to_string()))?;
        status.state = ChannelState::Started;
        Ok(())
    }

    async fn stop_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        self.journal.record(format!("stop:{channel_id}"));
        let mut channels = lock(&self.channels);
        let status = channels
            .get_mut(channel_id)
            .ok_or_else(|| MeridianError::ChannelNotFound(channel_id.to_string()))?;
        status.state = ChannelState::Stopped;
        Ok(())
    }

    async fn channel_statuses(&self) -> Result<Vec<ChannelStatus>, MeridianError> {
        Ok(lock(&self.channels).values().cloned().collect())
    }

    async fn deployed_count(&self) -> Result<usize, MeridianError> {
        Ok(lock(&self.channels).len())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
