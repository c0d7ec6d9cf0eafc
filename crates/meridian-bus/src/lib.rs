// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal typed event bus.
//!
//! Connectors, the lease manager and the shadow controller publish here;
//! destination and pruning collaborators, the gateway and tests subscribe.
//! Publishing never blocks and never fails: with no subscribers the event is
//! simply dropped, and slow subscribers observe `Lagged` on their receiver.

use chrono::{DateTime, Utc};
use meridian_core::{ChannelId, ConnectionStatus, MessageId, MetaDataId, ServerId, Status};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default capacity of the broadcast ring.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Events published by engine components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A connector's connection status changed.
    ConnectionStatus {
        channel_id: ChannelId,
        connector: String,
        status: ConnectionStatus,
    },
    /// A connector message reached SENT, or ERROR with no retry pending.
    MessageTerminal {
        channel_id: ChannelId,
        message_id: MessageId,
        meta_data_id: MetaDataId,
        status: Status,
    },
    LeaseAcquired {
        resource_id: String,
        server_id: ServerId,
        fencing_token: u64,
    },
    LeaseLost {
        resource_id: String,
        server_id: ServerId,
        fencing_token: u64,
    },
    ChannelPromoted {
        channel_id: ChannelId,
    },
    ChannelDemoted {
        channel_id: ChannelId,
    },
    CutoverCompleted {
        server_id: ServerId,
        started: usize,
        start_errors: usize,
    },
}

/// An event with its envelope.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: EngineEvent,
}

/// Cloneable handle to the process-wide event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let envelope = BusEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };
        tracing::trace!(event = ?envelope.event, "bus publish");
        // Err only means there are no subscribers right now.
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
