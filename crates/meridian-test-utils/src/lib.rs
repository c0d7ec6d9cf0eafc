// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for Meridian integration tests.
//!
//! # Components
//!
//! - [`RecordingDispatcher`] - Channel entry point that records every raw message
//! - [`FnScriptEngine`] - Script engine backed by Rust closures
//! - [`MockEngineController`] - Channel controller with scriptable start failures
//! - [`Journal`] - Shared, ordered log that several doubles can write to

pub mod journal;
pub mod mock_dispatcher;
pub mod mock_engine;
pub mod mock_script;

pub use journal::Journal;
pub use mock_dispatcher::RecordingDispatcher;
pub use mock_engine::MockEngineController;
pub use mock_script::{FnScriptEngine, ScriptFn};
