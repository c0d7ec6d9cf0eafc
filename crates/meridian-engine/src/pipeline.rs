// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatch path shared by connectors and the router.
//!
//! `dispatch_raw_message` builds a [`Message`] with a source connector message
//! in RECEIVED, runs the source transformer, then hands the transformed
//! content to each destination in metaDataId order. Every status change goes
//! through the [`Ledger`], which publishes terminal transitions on the bus.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use meridian_bus::{EngineEvent, EventBus};
use meridian_config::model::ResponseSelector;
use meridian_core::message::is_terminal;
use meridian_core::{
    ChannelId, ConnectorMessage, ContentType, DispatchOptions, DispatchResult, MeridianError,
    Message, MetaDataId, RawMessage, Response, SOURCE_META_DATA_ID, ServerId, SourceDispatcher,
    Status, StatusEvent, advance,
};
use tracing::{debug, warn};

/// Source filter and transformer.
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    /// Returns the transformed content, or `None` to filter the message.
    async fn transform(&self, source: &ConnectorMessage) -> Result<Option<String>, MeridianError>;
}

/// Accepts every message and passes the raw content through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl MessageProcessor for PassthroughProcessor {
    async fn transform(&self, source: &ConnectorMessage) -> Result<Option<String>, MeridianError> {
        Ok(Some(
            source.content(ContentType::Raw).unwrap_or_default().to_string(),
        ))
    }
}

/// An outbound connector.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Sends the ENCODED content of `message`. The response status decides the
    /// connector message's next status.
    async fn send(&self, message: &ConnectorMessage) -> Result<Response, MeridianError>;
}

/// Applies status events and announces terminal ones.
#[derive(Debug, Clone)]
pub struct Ledger {
    bus: EventBus,
}

impl Ledger {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn advance(
        &self,
        message: ConnectorMessage,
        event: StatusEvent,
    ) -> Result<ConnectorMessage, MeridianError> {
        let terminal = is_terminal(&event);
        let advanced = advance(message, event)?;
        if terminal {
            self.bus.publish(EngineEvent::MessageTerminal {
                channel_id: advanced.channel_id.clone(),
                message_id: advanced.message_id,
                meta_data_id: advanced.meta_data_id,
                status: advanced.status,
            });
        }
        Ok(advanced)
    }
}

/// One channel's dispatch path.
pub struct ChannelPipeline {
    channel_id: ChannelId,
    server_id: ServerId,
    response: ResponseSelector,
    processor: Arc<dyn MessageProcessor>,
    destinations: Vec<Arc<dyn Destination>>,
    ledger: Ledger,
    started: AtomicBool,
    next_message_id: AtomicU64,
}

impl ChannelPipeline {
    pub fn new(channel_id: ChannelId, server_id: ServerId, bus: EventBus) -> Self {
        Self {
            channel_id,
            server_id,
            response: ResponseSelector::None,
            processor: Arc::new(PassthroughProcessor),
            destinations: Vec::new(),
            ledger: Ledger::new(bus),
            started: AtomicBool::new(false),
            next_message_id: AtomicU64::new(1),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Appends a destination; the first gets metaDataId 1.
    pub fn with_destination(mut self, destination: Arc<dyn Destination>) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn with_response_selector(mut self, response: ResponseSelector) -> Self {
        self.response = response;
        self
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    async fn send_to_destinations(
        &self,
        message: &mut Message,
        transformed: &str,
    ) -> Result<BTreeMap<MetaDataId, Response>, MeridianError> {
        let mut responses = BTreeMap::new();
        let Some(source) = message.source().cloned() else {
            return Ok(responses);
        };

        for (index, destination) in self.destinations.iter().enumerate() {
            let meta_data_id = MetaDataId::try_from(index + 1).unwrap_or(MetaDataId::MAX);
            let mut cm = ConnectorMessage::new(
                source.message_id,
                meta_data_id,
                self.channel_id.clone(),
                destination.name(),
            );
            cm.channel_map = source.channel_map.clone();
            cm.source_map = source.source_map.clone();
            cm = self.ledger.advance(cm, StatusEvent::Transformed)?;
            cm.set_content(ContentType::Encoded, transformed);

            let response = match destination.send(&cm).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        channel_id = %self.channel_id,
                        destination = destination.name(),
                        error = %e,
                        "destination send failed"
                    );
                    Response::error(
                        format!("{} failed", destination.name()),
                        Some(e.chain_report()),
                    )
                }
            };

            cm.set_content(ContentType::Sent, transformed);
            if let Some(body) = response.message() {
                cm.set_content(ContentType::Response, body);
            }
            cm = self.ledger.advance(cm, event_for(&response))?;
            message.put(cm);
            responses.insert(meta_data_id, response);
        }
        Ok(responses)
    }

    fn select_response(
        &self,
        message: &Message,
        responses: &BTreeMap<MetaDataId, Response>,
    ) -> Option<Response> {
        match self.response {
            ResponseSelector::None => None,
            ResponseSelector::AutoAfterSource => {
                let filtered = message
                    .source()
                    .is_some_and(|source| source.status == Status::Filtered);
                Some(if filtered {
                    Response::new(Status::Filtered, None, "Message filtered", None)
                } else {
                    Response::new(Status::Sent, None, "Message received", None)
                })
            }
            ResponseSelector::Destination(meta_data_id) => responses.get(&meta_data_id).cloned(),
        }
    }
}

/// Maps a destination response to the status event it causes.
fn event_for(response: &Response) -> StatusEvent {
    match response.status() {
        Status::Sent => StatusEvent::SendSucceeded,
        Status::Queued => StatusEvent::SendQueued,
        Status::Pending => StatusEvent::ResponsePending,
        Status::Error => StatusEvent::SendFailed {
            error_code: None,
            error: response
                .error_detail()
                .unwrap_or(response.status_message())
                .to_string(),
            will_retry: false,
        },
        other => StatusEvent::SendFailed {
            error_code: None,
            error: format!("destination answered with unexpected status {other}"),
            will_retry: false,
        },
    }
}

#[async_trait]
impl SourceDispatcher for ChannelPipeline {
    async fn dispatch_raw_message(
        &self,
        raw: RawMessage,
        options: DispatchOptions,
    ) -> Result<DispatchResult, MeridianError> {
        if !options.force && !self.is_started() {
            return Err(MeridianError::ChannelNotStarted(self.channel_id.clone()));
        }

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let mut message = Message::new(message_id, self.channel_id.clone(), self.server_id.clone());
        let mut source = ConnectorMessage::new(
            message_id,
            SOURCE_META_DATA_ID,
            self.channel_id.clone(),
            "Source",
        );
        source.set_content(ContentType::Raw, raw.raw_data);
        source.source_map = raw.source_map;

        let responses = match self.processor.transform(&source).await? {
            None => {
                message.put(self.ledger.advance(source, StatusEvent::Filtered)?);
                BTreeMap::new()
            }
            Some(transformed) => {
                let mut source = self.ledger.advance(source, StatusEvent::Transformed)?;
                source.set_content(ContentType::Transformed, transformed.clone());
                message.put(source);
                self.send_to_destinations(&mut message, &transformed).await?
            }
        };

        let selected = self.select_response(&message, &responses);
        if options.store_raw_response
            && let Some(body) = selected.as_ref().and_then(Response::message)
            && let Some(source) = message.connector_message_mut(SOURCE_META_DATA_ID)
        {
            source.set_content(ContentType::Response, body);
        }

        debug!(
            channel_id = %self.channel_id,
            message_id,
            destinations = responses.len(),
            "message dispatched"
        );
        Ok(DispatchResult {
            message,
            selected_response: selected,
        })
    }
}
