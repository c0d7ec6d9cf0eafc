// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatch results.

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Result of a dispatch attempt. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    status: Status,
    message: Option<String>,
    status_message: String,
    error: Option<String>,
}

impl Response {
    pub fn new(
        status: Status,
        message: Option<String>,
        status_message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            status,
            message,
            status_message: status_message.into(),
            error,
        }
    }

    pub fn sent(message: impl Into<String>, status_message: impl Into<String>) -> Self {
        Self::new(Status::Sent, Some(message.into()), status_message, None)
    }

    /// An `ERROR` response with no payload.
    pub fn error(status_message: impl Into<String>, error: Option<String>) -> Self {
        Self::new(Status::Error, None, status_message, error)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Read-only view of a [`Response`] handed to user scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImmutableResponse(Response);

impl ImmutableResponse {
    pub fn status(&self) -> Status {
        self.0.status()
    }

    pub fn message(&self) -> Option<&str> {
        self.0.message()
    }

    pub fn status_message(&self) -> &str {
        self.0.status_message()
    }

    pub fn error(&self) -> Option<&str> {
        self.0.error_detail()
    }
}

impl From<Response> for ImmutableResponse {
    fn from(response: Response) -> Self {
        Self(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_has_no_payload() {
        let response = Response::error("Could not route", Some("trace".into()));
        assert_eq!(response.status(), Status::Error);
        assert!(response.message().is_none());
        assert_eq!(response.error_detail(), Some("trace"));
    }

    #[test]
    fn immutable_view_serializes_like_response() {
        let response = Response::sent("MSA|AA", "delivered");
        let view = ImmutableResponse::from(response.clone());
        assert_eq!(
            serde_json::to_value(&view).unwrap(),
            serde_json::to_value(&response).unwrap()
        );
        assert_eq!(view.status_message(), "delivered");
    }
}
