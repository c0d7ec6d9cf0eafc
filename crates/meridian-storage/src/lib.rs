// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite coordination store for the Meridian integration engine.
//!
//! Holds the two pieces of state whose source of truth is shared across
//! cluster nodes: the lease table and the server registry. WAL-mode SQLite,
//! embedded migrations, and a single-writer model via `tokio-rusqlite`.

pub mod database;
pub mod migrations;
pub mod queries;
pub mod store;

pub use database::Database;
pub use store::{SqliteLeaseStore, SqliteServerRegistry};
