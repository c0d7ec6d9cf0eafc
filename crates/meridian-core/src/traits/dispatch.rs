// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source entry point of a channel and channel lookup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MeridianError;
use crate::message::{ConnectorMessage, Message, RawMessage};
use crate::response::{ImmutableResponse, Response};
use crate::types::ChannelId;

/// Options for a single dispatch into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOptions {
    /// Process the message even when the channel is not started.
    pub force: bool,
    /// Store the selected response as RESPONSE content on the source message.
    pub store_raw_response: bool,
}

/// Outcome of dispatching a raw message into a channel.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub message: Message,
    /// The response selected by the channel's source, if it produces one.
    pub selected_response: Option<Response>,
}

/// The entry point connectors and the router use to hand raw data to a channel.
#[async_trait]
pub trait SourceDispatcher: Send + Sync + 'static {
    async fn dispatch_raw_message(
        &self,
        raw: RawMessage,
        options: DispatchOptions,
    ) -> Result<DispatchResult, MeridianError>;
}

/// A deployed channel as seen by the router.
#[derive(Clone)]
pub struct ResolvedChannel {
    pub channel_id: ChannelId,
    pub name: String,
    pub dispatcher: Arc<dyn SourceDispatcher>,
}

impl std::fmt::Debug for ResolvedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedChannel")
            .field("channel_id", &self.channel_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Looks up deployed channels by exact name or by id.
pub trait ChannelResolver: Send + Sync + 'static {
    fn resolve(&self, name_or_id: &str) -> Option<ResolvedChannel>;
}

/// Routes a message into another deployed channel on behalf of user code.
///
/// Routing never fails: an unknown target or a failed dispatch comes back as
/// an ERROR response. When `origin` is given, the new message records it as
/// its source.
#[async_trait]
pub trait MessageRouter: Send + Sync + 'static {
    async fn route_message(
        &self,
        target: &str,
        message: RawMessage,
        origin: Option<&ConnectorMessage>,
    ) -> Option<ImmutableResponse>;
}
