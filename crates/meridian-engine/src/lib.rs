// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel engine for Meridian.
//!
//! - [`pipeline`] - the dispatch path: a raw message becomes a [`Message`]
//!   whose connector messages advance through the status table
//! - [`manager`] - deployed channels, start/stop, lease activation
//! - [`router`] - hands a message from one channel to another by name or id
//! - [`builder`] - channels from configuration
//!
//! [`Message`]: meridian_core::Message

pub mod builder;
pub mod gate;
pub mod manager;
pub mod pipeline;
pub mod router;

pub use builder::{ChannelBuilder, EngineDeps};
pub use gate::CompositeGate;
pub use manager::{Channel, ChannelManager};
pub use pipeline::{ChannelPipeline, Destination, Ledger, MessageProcessor, PassthroughProcessor};
pub use router::ChannelRouter;
