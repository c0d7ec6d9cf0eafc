// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandboxed script execution for connector select/update scripts.

mod host;
pub mod sandbox;

pub use sandbox::{SandboxLimits, WasmCompiledScript, WasmScriptEngine};
