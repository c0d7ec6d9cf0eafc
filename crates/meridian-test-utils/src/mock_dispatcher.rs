// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel entry point for connector and router tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{
    ChannelId, ConnectorMessage, ContentType, DispatchOptions, DispatchResult, MeridianError,
    Message, RawMessage, Response, SOURCE_META_DATA_ID, ServerId, SourceDispatcher, Status,
};
use tokio::sync::{Mutex, Notify};

use crate::journal::Journal;

/// Records every dispatched raw message and answers with a one-connector message.
///
/// Each dispatch is also written to the journal as `dispatch:<raw data>`.
pub struct RecordingDispatcher {
    channel_id: ChannelId,
    received: Mutex<Vec<RawMessage>>,
    journal: Journal,
    next_id: AtomicU64,
    failure: Option<String>,
    response: Option<Response>,
    notify: Notify,
}

impl RecordingDispatcher {
    pub fn new(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            received: Mutex::new(Vec::new()),
            journal: Journal::new(),
            next_id: AtomicU64::new(1),
            failure: None,
            response: None,
            notify: Notify::new(),
        }
    }

    /// Writes dispatch entries to `journal` instead of a private one.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Every dispatch fails with `message` (after being recorded).
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Every dispatch selects `response`.
    pub fn responding(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub async fn received(&self) -> Vec<RawMessage> {
        self.received.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.received.lock().await.len()
    }

    /// Waits until at least `n` messages were received. Returns false on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.count().await >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl SourceDispatcher for RecordingDispatcher {
    async fn dispatch_raw_message(
        &self,
        raw: RawMessage,
        _options: DispatchOptions,
    ) -> Result<DispatchResult, MeridianError> {
        self.journal.record(format!("dispatch:{}", raw.raw_data));
        self.received.lock().await.push(raw.clone());
        self.notify.notify_waiters();

        if let Some(failure) = &self.failure {
            return Err(MeridianError::Internal(failure.clone()));
        }

        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut source = ConnectorMessage::new(
            message_id,
            SOURCE_META_DATA_ID,
            self.channel_id.clone(),
            "Source",
        );
        source.set_content(ContentType::Raw, raw.raw_data);
        source.source_map = raw.source_map;
        source.status = Status::Transformed;

        let mut message = Message::new(message_id, self.channel_id.clone(), ServerId::from("test-server"));
        message.put(source);
        Ok(DispatchResult {
            message,
            selected_response: self.response.clone(),
        })
    }
}

impl std::fmt::Debug for RecordingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingDispatcher")
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_answers_with_source_message() {
        let dispatcher = RecordingDispatcher::new("adt-in");
        let result = dispatcher
            .dispatch_raw_message(RawMessage::new("MSH|^~\\&|"), DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.message.message_id(), 1);
        assert_eq!(
            result.message.source().unwrap().content(ContentType::Raw),
            Some("MSH|^~\\&|")
        );
        assert_eq!(dispatcher.journal().entries(), vec!["dispatch:MSH|^~\\&|"]);
    }

    #[tokio::test]
    async fn failing_dispatcher_still_records() {
        let dispatcher = RecordingDispatcher::new("adt-in").failing("channel halted");
        let err = dispatcher
            .dispatch_raw_message(RawMessage::new("x"), DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel halted"));
        assert_eq!(dispatcher.count().await, 1);
    }
}
