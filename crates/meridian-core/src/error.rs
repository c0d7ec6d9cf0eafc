// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Meridian integration engine.

use thiserror::Error;

use crate::status::{Status, StatusEvent};
use crate::types::ChannelId;

/// The primary error type used across all Meridian crates.
#[derive(Debug, Error)]
pub enum MeridianError {
    /// Configuration errors (invalid TOML, missing required fields, bad connector settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Connector runtime errors (connection failure, query failure, dispatch failure).
    #[error("connector error in {connector} on channel {channel_id}: {message}")]
    Connector {
        channel_id: ChannelId,
        connector: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A user script trapped, ran out of budget, or produced unusable output.
    #[error("script '{script}' failed: {message}")]
    Script { script: String, message: String },

    /// A user script could not be compiled.
    #[error("script '{script}' failed to compile: {message}")]
    Compile { script: String, message: String },

    /// The message ledger rejected a status change.
    #[error("invalid status transition: {event} is not allowed from {from}")]
    InvalidTransition { from: Status, event: StatusEvent },

    /// A channel could not be found by id or name.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// A channel failed to start.
    #[error("channel {channel_id} failed to start: {message}")]
    ChannelStart {
        channel_id: ChannelId,
        message: String,
    },

    /// A channel failed to stop.
    #[error("channel {channel_id} failed to stop: {message}")]
    ChannelStop {
        channel_id: ChannelId,
        message: String,
    },

    /// A message was dispatched to a channel that is not started.
    #[error("channel {0} is not started")]
    ChannelNotStarted(ChannelId),

    /// Promotion or cutover requested while shadow mode is off.
    #[error("shadow mode is not enabled")]
    ShadowModeDisabled,

    /// Promotion requested for a channel that is already promoted.
    #[error("channel {0} is already promoted")]
    AlreadyPromoted(ChannelId),

    /// Demotion requested for a channel that was never promoted.
    #[error("channel {0} is not promoted")]
    NotPromoted(ChannelId),

    /// The cluster lease for a resource is no longer held by this server.
    #[error("lease lost for resource {resource_id}")]
    LeaseLost { resource_id: String },

    /// A write carried a fencing token older than the current lease.
    #[error(
        "stale fencing token for resource {resource_id}: presented {presented}, current {current}"
    )]
    StaleFencingToken {
        resource_id: String,
        presented: u64,
        current: u64,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MeridianError {
    /// Shorthand for a connector error without an underlying source.
    pub fn connector(
        channel_id: &ChannelId,
        connector: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connector {
            channel_id: channel_id.clone(),
            connector: connector.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Renders this error followed by every error in its `source()` chain,
    /// one per line. Used wherever a full diagnostic is recorded as text.
    pub fn chain_report(&self) -> String {
        let mut report = self.to_string();
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            std::error::Error::source(self);
        while let Some(err) = current {
            report.push_str("\ncaused by: ");
            report.push_str(&err.to_string());
            current = err.source();
        }
        report
    }

    /// Returns true for errors caused by a caller precondition rather than a failure.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ShadowModeDisabled | Self::AlreadyPromoted(_) | Self::NotPromoted(_)
        )
    }
}
