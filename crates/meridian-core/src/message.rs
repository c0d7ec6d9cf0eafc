// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message ledger: the per-connector view of a message and the rules for
//! advancing it through [`Status`] values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::MeridianError;
use crate::status::{Status, StatusEvent, next_status};
use crate::types::{ChannelId, MessageId, MetaDataId, SOURCE_META_DATA_ID, ServerId};

/// String-keyed values passed between scripted steps and connectors.
pub type ValueMap = BTreeMap<String, serde_json::Value>;

/// Kinds of content stored on a connector message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Raw,
    Transformed,
    Encoded,
    Sent,
    Response,
}

/// One connector's view of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorMessage {
    pub message_id: MessageId,
    pub meta_data_id: MetaDataId,
    pub channel_id: ChannelId,
    pub connector_name: String,
    pub received_date: DateTime<Utc>,
    pub status: Status,
    pub send_attempts: u32,
    pub send_date: Option<DateTime<Utc>>,
    pub response_date: Option<DateTime<Utc>>,
    pub error_code: Option<i32>,
    pub error: Option<String>,
    pub content: BTreeMap<ContentType, String>,
    pub channel_map: ValueMap,
    pub source_map: ValueMap,
    pub connector_map: ValueMap,
}

impl ConnectorMessage {
    /// Creates a connector message in `RECEIVED`.
    pub fn new(
        message_id: MessageId,
        meta_data_id: MetaDataId,
        channel_id: ChannelId,
        connector_name: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            meta_data_id,
            channel_id,
            connector_name: connector_name.into(),
            received_date: Utc::now(),
            status: Status::Received,
            send_attempts: 0,
            send_date: None,
            response_date: None,
            error_code: None,
            error: None,
            content: BTreeMap::new(),
            channel_map: ValueMap::new(),
            source_map: ValueMap::new(),
            connector_map: ValueMap::new(),
        }
    }

    pub fn content(&self, content_type: ContentType) -> Option<&str> {
        self.content.get(&content_type).map(String::as_str)
    }

    pub fn set_content(&mut self, content_type: ContentType, value: impl Into<String>) {
        self.content.insert(content_type, value.into());
    }
}

/// Applies `event` to `message` and returns the advanced message.
///
/// Fails with [`MeridianError::InvalidTransition`] when the event is not legal
/// in the message's current status. Error details are only recorded on the
/// transition into `ERROR`; any other transition clears nothing and sets nothing
/// besides the status, the retry counter and the send/response dates.
pub fn advance(
    mut message: ConnectorMessage,
    event: StatusEvent,
) -> Result<ConnectorMessage, MeridianError> {
    let from = message.status;
    let Some(to) = next_status(from, &event) else {
        return Err(MeridianError::InvalidTransition { from, event });
    };

    match event {
        StatusEvent::SendFailed {
            error_code, error, ..
        } => {
            message.error_code = error_code;
            message.error = Some(error);
        }
        StatusEvent::SendRetried => {
            message.send_attempts += 1;
        }
        StatusEvent::SendSucceeded => {
            let now = Utc::now();
            message.send_date.get_or_insert(now);
            if from == Status::Pending {
                message.response_date = Some(now);
            }
        }
        StatusEvent::ResponsePending => {
            message.send_date = Some(Utc::now());
        }
        StatusEvent::Filtered | StatusEvent::Transformed | StatusEvent::SendQueued => {}
    }

    message.status = to;
    Ok(message)
}

/// Returns true when `event` ends processing of a message in its new status.
///
/// `SENT` always terminates; `ERROR` terminates only when no retry follows.
pub fn is_terminal(event: &StatusEvent) -> bool {
    match event {
        StatusEvent::SendSucceeded => true,
        StatusEvent::SendFailed { will_retry, .. } => !will_retry,
        _ => false,
    }
}

/// One inbound unit of work and all of its connector messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    message_id: MessageId,
    channel_id: ChannelId,
    server_id: ServerId,
    received_date: DateTime<Utc>,
    connector_messages: BTreeMap<MetaDataId, ConnectorMessage>,
}

impl Message {
    pub fn new(message_id: MessageId, channel_id: ChannelId, server_id: ServerId) -> Self {
        Self {
            message_id,
            channel_id,
            server_id,
            received_date: Utc::now(),
            connector_messages: BTreeMap::new(),
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn received_date(&self) -> DateTime<Utc> {
        self.received_date
    }

    /// Connector messages in metaDataId order; the source comes first.
    pub fn connector_messages(&self) -> &BTreeMap<MetaDataId, ConnectorMessage> {
        &self.connector_messages
    }

    pub fn connector_message(&self, meta_data_id: MetaDataId) -> Option<&ConnectorMessage> {
        self.connector_messages.get(&meta_data_id)
    }

    pub fn connector_message_mut(
        &mut self,
        meta_data_id: MetaDataId,
    ) -> Option<&mut ConnectorMessage> {
        self.connector_messages.get_mut(&meta_data_id)
    }

    pub fn source(&self) -> Option<&ConnectorMessage> {
        self.connector_message(SOURCE_META_DATA_ID)
    }

    /// Inserts or replaces the connector message at its metaDataId slot.
    pub fn put(&mut self, connector_message: ConnectorMessage) {
        self.connector_messages
            .insert(connector_message.meta_data_id, connector_message);
    }

    /// Removes the connector message at `meta_data_id` so it can be advanced by value.
    pub fn take(&mut self, meta_data_id: MetaDataId) -> Option<ConnectorMessage> {
        self.connector_messages.remove(&meta_data_id)
    }

    /// The source connector message with the channel and connector maps of every
    /// destination merged in, in metaDataId order. Later destinations win on key
    /// collisions. Destination responses are exposed under `responseMap`-style
    /// keys `d<metaDataId>` in the connector map.
    pub fn merged_connector_message(&self) -> Option<ConnectorMessage> {
        let mut merged = self.source()?.clone();
        for (meta_data_id, destination) in self.connector_messages.range(1..) {
            merged.channel_map.extend(
                destination
                    .channel_map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            merged.connector_map.extend(
                destination
                    .connector_map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            merged.connector_map.insert(
                format!("d{meta_data_id}"),
                serde_json::json!({
                    "status": destination.status,
                    "response": destination.content(ContentType::Response),
                    "error": destination.error,
                }),
            );
        }
        Some(merged)
    }
}

/// Raw payload handed to a channel's source entry point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub raw_data: String,
    pub source_map: ValueMap,
}

impl RawMessage {
    pub fn new(raw_data: impl Into<String>) -> Self {
        Self {
            raw_data: raw_data.into(),
            source_map: ValueMap::new(),
        }
    }

    pub fn with_source_map(mut self, source_map: ValueMap) -> Self {
        self.source_map = source_map;
        self
    }
}

impl From<&str> for RawMessage {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RawMessage {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
