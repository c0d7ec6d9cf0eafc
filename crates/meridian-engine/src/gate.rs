// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use meridian_core::{PollDecision, PollGate};

/// Proceeds only when every inner gate proceeds. The first fencing token any
/// gate supplies is carried through.
#[derive(Clone, Default)]
pub struct CompositeGate {
    gates: Vec<Arc<dyn PollGate>>,
}

impl CompositeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: Arc<dyn PollGate>) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl PollGate for CompositeGate {
    fn decide(&self) -> PollDecision {
        let mut token = None;
        for gate in &self.gates {
            match gate.decide() {
                PollDecision::Proceed { fencing_token } => token = token.or(fencing_token),
                skip @ PollDecision::Skip { .. } => return skip,
            }
        }
        PollDecision::Proceed {
            fencing_token: token,
        }
    }
}

impl std::fmt::Debug for CompositeGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeGate")
            .field("gates", &self.gates.len())
            .finish()
    }
}
