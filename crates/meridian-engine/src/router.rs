// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inter-channel routing.
//!
//! Routing never fails from the caller's point of view: an unknown target or a
//! failed dispatch comes back as an ERROR [`Response`].

use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{
    ChannelResolver, ConnectorMessage, DispatchOptions, ImmutableResponse, MessageRouter,
    RawMessage, Response, ValueMap,
};
use serde_json::Value;
use tracing::{debug, warn};

const SOURCE_CHANNEL_ID: &str = "sourceChannelId";
const SOURCE_CHANNEL_IDS: &str = "sourceChannelIds";
const SOURCE_MESSAGE_ID: &str = "sourceMessageId";
const SOURCE_MESSAGE_IDS: &str = "sourceMessageIds";

/// Hands messages from one channel to another by name or id.
#[derive(Clone)]
pub struct ChannelRouter {
    resolver: Arc<dyn ChannelResolver>,
}

impl ChannelRouter {
    pub fn new(resolver: Arc<dyn ChannelResolver>) -> Self {
        Self { resolver }
    }

    /// Dispatches `message` into the channel named (or identified by)
    /// `target` and returns that channel's selected response, if any.
    pub async fn route(&self, target: &str, message: impl Into<RawMessage>) -> Option<Response> {
        let Some(channel) = self.resolver.resolve(target) else {
            warn!(target, "route target not found");
            return Some(Response::error(
                format!("Could not find channel to route to for channel name/id: {target}"),
                None,
            ));
        };

        let options = DispatchOptions {
            force: false,
            store_raw_response: true,
        };
        match channel
            .dispatcher
            .dispatch_raw_message(message.into(), options)
            .await
        {
            Ok(result) => {
                debug!(
                    target_channel = %channel.channel_id,
                    message_id = result.message.message_id(),
                    "message routed"
                );
                result.selected_response
            }
            Err(e) => {
                warn!(target_channel = %channel.channel_id, error = %e, "routed dispatch failed");
                Some(Response::error(
                    format!(
                        "Error routing message to channel {}: {e}",
                        channel.channel_id
                    ),
                    Some(e.chain_report()),
                ))
            }
        }
    }

    /// Routes on behalf of `origin`, recording where the message came from in
    /// the new message's source map.
    pub async fn route_from(
        &self,
        origin: &ConnectorMessage,
        target: &str,
        message: impl Into<RawMessage>,
    ) -> Option<Response> {
        let mut raw = message.into();
        stamp_origin(&mut raw.source_map, origin);
        self.route(target, raw).await
    }
}

/// Script-facing routing. Scripts only ever see the read-only response.
#[async_trait]
impl MessageRouter for ChannelRouter {
    async fn route_message(
        &self,
        target: &str,
        message: RawMessage,
        origin: Option<&ConnectorMessage>,
    ) -> Option<ImmutableResponse> {
        let response = match origin {
            Some(origin) => self.route_from(origin, target, message).await,
            None => self.route(target, message).await,
        };
        response.map(ImmutableResponse::from)
    }
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter").finish_non_exhaustive()
    }
}

/// Extends the provenance chain carried by `origin` with `origin` itself.
fn stamp_origin(source_map: &mut ValueMap, origin: &ConnectorMessage) {
    let mut channel_ids = chain(&origin.source_map, SOURCE_CHANNEL_IDS, SOURCE_CHANNEL_ID);
    channel_ids.push(Value::from(origin.channel_id.as_str()));
    let mut message_ids = chain(&origin.source_map, SOURCE_MESSAGE_IDS, SOURCE_MESSAGE_ID);
    message_ids.push(Value::from(origin.message_id));

    source_map.insert(
        SOURCE_CHANNEL_ID.into(),
        Value::from(origin.channel_id.as_str()),
    );
    source_map.insert(SOURCE_MESSAGE_ID.into(), Value::from(origin.message_id));
    source_map.insert(SOURCE_CHANNEL_IDS.into(), Value::Array(channel_ids));
    source_map.insert(SOURCE_MESSAGE_IDS.into(), Value::Array(message_ids));
}

/// The chain recorded so far: the list if present, else the single previous hop.
fn chain(map: &ValueMap, list_key: &str, single_key: &str) -> Vec<Value> {
    match (map.get(list_key), map.get(single_key)) {
        (Some(Value::Array(list)), _) => list.clone(),
        (_, Some(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::ChannelId;
    use serde_json::json;

    #[test]
    fn first_hop_starts_the_chain() {
        let origin = ConnectorMessage::new(4, 0, ChannelId::from("adt-in"), "Source");
        let mut map = ValueMap::new();
        stamp_origin(&mut map, &origin);
        assert_eq!(map[SOURCE_CHANNEL_ID], json!("adt-in"));
        assert_eq!(map[SOURCE_MESSAGE_ID], json!(4));
        assert_eq!(map[SOURCE_CHANNEL_IDS], json!(["adt-in"]));
        assert_eq!(map[SOURCE_MESSAGE_IDS], json!([4]));
    }

    #[test]
    fn later_hops_extend_the_chain() {
        let mut origin = ConnectorMessage::new(9, 0, ChannelId::from("lab-out"), "Source");
        origin
            .source_map
            .insert(SOURCE_CHANNEL_ID.into(), json!("adt-in"));
        origin.source_map.insert(SOURCE_MESSAGE_ID.into(), json!(4));

        let mut map = ValueMap::new();
        stamp_origin(&mut map, &origin);
        assert_eq!(map[SOURCE_CHANNEL_ID], json!("lab-out"));
        assert_eq!(map[SOURCE_CHANNEL_IDS], json!(["adt-in", "lab-out"]));
        assert_eq!(map[SOURCE_MESSAGE_IDS], json!([4, 9]));
    }
}
