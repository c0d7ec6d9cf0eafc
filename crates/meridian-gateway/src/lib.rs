// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane HTTP API for Meridian.
//!
//! Operators drive shadow mode and cutover, and inspect channels and the
//! cluster lease inventory, through a small bearer-authenticated JSON API.
//! `GET /health` stays open for load balancers and systemd.

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use server::{GatewayState, ServerConfig, router, start_server};
