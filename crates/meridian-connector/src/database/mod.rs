// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling database reader.
//!
//! Each tick runs the select (an SQL statement or a compiled script),
//! dispatches the rows into the channel, and runs the optional update
//! statement according to its [`UpdateMode`](meridian_config::model::UpdateMode).

mod pool;
mod receiver;
mod rows;

pub use pool::{ConnectionPool, DatabaseUrl, PooledConnection};
pub use receiver::{DatabaseReceiver, PollOutcome, ScriptBundle};
pub use rows::ConnectionDatabase;
