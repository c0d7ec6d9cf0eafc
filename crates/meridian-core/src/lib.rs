// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Meridian integration engine.
//!
//! This crate provides the message ledger (connector messages, the status
//! state machine, responses), the workspace error type, shared identifiers,
//! and the collaborator traits the connector runtime, cluster layer and
//! engine are wired together with.

pub mod error;
pub mod message;
pub mod response;
pub mod status;
pub mod traits;
pub mod types;

pub use error::MeridianError;
pub use message::{ConnectorMessage, ContentType, Message, RawMessage, ValueMap, advance};
pub use response::{ImmutableResponse, Response};
pub use status::{Status, StatusEvent};
pub use types::{
    ChannelId, ChannelState, ChannelStatus, ConnectionStatus, MessageId,
    MetaDataId, SOURCE_META_DATA_ID, ServerId, ServerStatus,
};

pub use traits::{
    ChannelResolver, CompiledScript, DispatchOptions, DispatchResult, EngineController,
    FencingValidator, Lease, LeaseStore, MessageRouter, OpenGate, PollDecision, PollGate,
    ResolvedChannel, ScriptDatabase, ScriptEngine, ScriptScope, ScriptSource, ServerRegistry,
    SourceDispatcher,
};
