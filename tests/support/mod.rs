//! Shared test doubles for the integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tiltwatch::domain::{BookDelta, BookSnapshot};
use tiltwatch::error::{FeedError, NotifyError};
use tiltwatch::feed::{FeedEvent, FeedTransport};
use tiltwatch::notify::Notifier;

/// Transport that replays a scripted session per successful connect.
pub struct ScriptedTransport {
    connects: VecDeque<bool>,
    sessions: VecDeque<VecDeque<FeedEvent>>,
    current: VecDeque<FeedEvent>,
}

impl ScriptedTransport {
    pub fn new(connects: Vec<bool>, sessions: Vec<Vec<FeedEvent>>) -> Self {
        Self {
            connects: connects.into(),
            sessions: sessions.into_iter().map(Into::into).collect(),
            current: VecDeque::new(),
        }
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), FeedError> {
        match self.connects.pop_front() {
            Some(true) => {
                self.current = self.sessions.pop_front().unwrap_or_default();
                Ok(())
            }
            _ => Err(FeedError::Connection("refused".into())),
        }
    }

    fn request_snapshot(&mut self) {}

    async fn next_event(&mut self) -> Option<FeedEvent> {
        Some(self.current.pop_front().unwrap_or(FeedEvent::Disconnected {
            reason: "script exhausted".into(),
        }))
    }

    async fn close(&mut self) {}

    fn name(&self) -> &'static str {
        "Scripted"
    }
}

/// Notifier recording every delivered message.
#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Helpers for building feed events.
pub mod events {
    use super::{BookDelta, BookSnapshot, FeedEvent};
    use rust_decimal::Decimal;

    pub fn snapshot(
        update_id: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) -> FeedEvent {
        FeedEvent::Snapshot(BookSnapshot {
            update_id,
            bids,
            asks,
        })
    }

    pub fn delta(
        update_id: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) -> FeedEvent {
        FeedEvent::Delta(BookDelta::contiguous(update_id, bids, asks))
    }
}
