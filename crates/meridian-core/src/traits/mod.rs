// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits. Components take these as constructor parameters so
//! every piece of core logic can run against injected fakes.

pub mod dispatch;
pub mod engine;
pub mod gate;
pub mod lease;
pub mod registry;
pub mod script;

pub use dispatch::{
    ChannelResolver, DispatchOptions, DispatchResult, MessageRouter, ResolvedChannel,
    SourceDispatcher,
};
pub use engine::EngineController;
pub use gate::{OpenGate, PollDecision, PollGate};
pub use lease::{FencingValidator, Lease, LeaseStore};
pub use registry::ServerRegistry;
pub use script::{CompiledScript, ScriptDatabase, ScriptEngine, ScriptScope, ScriptSource};
