// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Poll gating: whether a source connector may begin its next poll tick.

/// Decision returned by a [`PollGate`] before each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// Poll now. Clustered resources carry the fencing token of the held lease.
    Proceed { fencing_token: Option<u64> },
    /// Do not poll this tick.
    Skip { reason: String },
}

impl PollDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, PollDecision::Proceed { .. })
    }
}

/// Consulted by a connector before every poll tick, never mid-poll.
pub trait PollGate: Send + Sync + 'static {
    fn decide(&self) -> PollDecision;
}

/// A gate that always lets the connector poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl PollGate for OpenGate {
    fn decide(&self) -> PollDecision {
        PollDecision::Proceed {
            fencing_token: None,
        }
    }
}
