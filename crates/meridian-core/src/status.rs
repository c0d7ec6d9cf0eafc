// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message status values and the events that move a connector message between them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Processing status of a connector message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Received,
    Filtered,
    Transformed,
    Sent,
    Queued,
    Error,
    Pending,
}

impl Status {
    /// Single-letter code used in compact listings.
    pub fn code(self) -> char {
        match self {
            Status::Received => 'R',
            Status::Filtered => 'F',
            Status::Transformed => 'T',
            Status::Sent => 'S',
            Status::Queued => 'Q',
            Status::Error => 'E',
            Status::Pending => 'P',
        }
    }
}

/// Something that happened to a connector message.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "camelCase")]
pub enum StatusEvent {
    Filtered,
    Transformed,
    SendSucceeded,
    SendQueued,
    SendFailed {
        error_code: Option<i32>,
        error: String,
        /// Whether the destination will retry this message.
        will_retry: bool,
    },
    SendRetried,
    /// The send went out and the destination awaits an asynchronous response.
    ResponsePending,
}

/// Transition table. Returns the status reached by applying `event` in
/// `from`, or `None` when the pair is not a legal transition.
pub fn next_status(from: Status, event: &StatusEvent) -> Option<Status> {
    use Status::*;
    match (from, event) {
        (Received, StatusEvent::Filtered) => Some(Filtered),
        (Received, StatusEvent::Transformed) => Some(Transformed),
        (Transformed | Queued | Pending, StatusEvent::SendSucceeded) => Some(Sent),
        (Transformed, StatusEvent::SendQueued) => Some(Queued),
        (Transformed | Queued | Pending, StatusEvent::SendFailed { .. }) => Some(Error),
        (Queued | Error, StatusEvent::SendRetried) => Some(Queued),
        (Transformed, StatusEvent::ResponsePending) => Some(Pending),
        _ => None,
    }
}
