// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source connector runtime.
//!
//! Every source connector follows the same lifecycle
//! (`UNDEPLOYED → DEPLOYED → RUNNING → STOPPED → UNDEPLOYED`) behind the
//! [`SourceConnector`] trait. Polling connectors drive their work from a
//! cancellable [`scheduler`] and wrap query attempts in the bounded
//! [`retry`] loop. The [`database`] module is the polling database reader.

pub mod database;
pub mod lifecycle;
pub mod retry;
pub mod scheduler;

pub use database::{DatabaseReceiver, PollOutcome, ScriptBundle};
pub use lifecycle::{ConnectorContext, ConnectorState, SourceConnector};
pub use retry::RetryPolicy;
pub use scheduler::{TaskHandle, spawn_repeating};
