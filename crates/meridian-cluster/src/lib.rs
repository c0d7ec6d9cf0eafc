// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster coordination for Meridian.
//!
//! - [`LeaseManager`] - per-resource exclusive leases with fencing tokens,
//!   renewed on a heartbeat and exposed to connectors as a poll gate
//! - [`ShadowController`] - shadow mode, per-channel promotion and the
//!   one-way cutover to full operation
//! - [`InMemoryLeaseStore`] - single-process lease store with the same
//!   semantics as the SQLite one

pub mod clock;
pub mod lease;
pub mod memory;
pub mod shadow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lease::{LeaseFence, LeaseHandle, LeaseManager, LeaseSettings};
pub use memory::InMemoryLeaseStore;
pub use shadow::{
    CutoverHook, CutoverReport, SharedShadowState, ShadowController, ShadowGate, ShadowStatus,
    StartError,
};
