//! Per-symbol feed client.
//!
//! Drives a [`FeedTransport`] through the connection lifecycle
//! `Connecting -> Syncing -> Live -> Reconnecting -> Closed`, keeps the order
//! book synchronized, and hands every applied update to the sink in feed
//! order. A sequence gap is never patched heuristically: the book is thrown
//! away and rebuilt from a fresh snapshot.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use super::{FeedEvent, FeedTransport};
use crate::config::ReconnectionConfig;
use crate::domain::{BookDelta, OrderBook, Symbol};
use crate::error::FeedError;

/// Feed client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Syncing,
    Live,
    Reconnecting,
    Closed,
}

/// Receives the book after every applied update, synchronously and in feed
/// order.
pub trait UpdateSink {
    fn on_update(&mut self, book: &OrderBook, at: Instant);
}

impl<F: FnMut(&OrderBook, Instant)> UpdateSink for F {
    fn on_update(&mut self, book: &OrderBook, at: Instant) {
        self(book, at);
    }
}

/// Exponential backoff with full jitter.
#[derive(Debug)]
struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    current_ms: u64,
}

impl Backoff {
    fn new(config: &ReconnectionConfig) -> Self {
        Self {
            initial_ms: config.initial_delay_ms,
            max_ms: config.max_delay_ms,
            multiplier: config.backoff_multiplier,
            current_ms: config.initial_delay_ms,
        }
    }

    fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }

    /// Draw a uniformly jittered delay from the current window, then widen
    /// the window for the next attempt.
    fn next_delay(&mut self) -> Duration {
        let jittered = rand::thread_rng().gen_range(0..=self.current_ms);
        let widened = (self.current_ms as f64 * self.multiplier) as u64;
        self.current_ms = widened.min(self.max_ms);
        Duration::from_millis(jittered)
    }
}

/// State machine driving one symbol's feed.
pub struct FeedClient<T: FeedTransport> {
    symbol: Symbol,
    transport: T,
    book: OrderBook,
    state: FeedState,
    backoff: Backoff,
    connect_attempts: u32,
    max_retries: u32,
    /// Deltas received while waiting for the snapshot during `Syncing`.
    buffered: Vec<BookDelta>,
}

impl<T: FeedTransport> FeedClient<T> {
    pub fn new(symbol: Symbol, transport: T, config: &ReconnectionConfig) -> Self {
        Self {
            book: OrderBook::new(symbol.clone()),
            symbol,
            transport,
            state: FeedState::Connecting,
            backoff: Backoff::new(config),
            connect_attempts: 0,
            max_retries: config.max_retries,
            buffered: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> FeedState {
        self.state
    }

    #[must_use]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Run until shutdown or fatal failure.
    ///
    /// Returns `Ok(())` after an orderly close and `Err` when connection
    /// retries are exhausted; either way the client ends in `Closed` and the
    /// supervisor decides what happens next.
    pub async fn run(
        &mut self,
        sink: &mut impl UpdateSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        loop {
            // A dropped sender counts as a shutdown request.
            let shutdown_requested = *shutdown.borrow() || shutdown.has_changed().is_err();
            if shutdown_requested && self.state != FeedState::Closed {
                self.transport.close().await;
                self.transition(FeedState::Closed);
            }

            match self.state {
                FeedState::Connecting => self.connect_step(&mut shutdown).await?,
                FeedState::Syncing => self.sync_step(sink, &mut shutdown).await,
                FeedState::Live => self.live_step(sink, &mut shutdown).await,
                FeedState::Reconnecting => {
                    self.transport.close().await;
                    self.transition(FeedState::Connecting);
                }
                FeedState::Closed => return Ok(()),
            }
        }
    }

    fn transition(&mut self, next: FeedState) {
        if self.state != next {
            info!(
                symbol = %self.symbol,
                from = ?self.state,
                to = ?next,
                "feed state transition"
            );
            self.state = next;
        }
    }

    async fn connect_step(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), FeedError> {
        match self.transport.connect().await {
            Ok(()) => {
                self.connect_attempts = 0;
                self.backoff.reset();
                // Fresh connection means a fresh book; the old one is stale.
                self.book = OrderBook::new(self.symbol.clone());
                self.buffered.clear();
                self.transport.request_snapshot();
                self.transition(FeedState::Syncing);
                Ok(())
            }
            Err(e) => {
                self.connect_attempts += 1;
                if self.connect_attempts >= self.max_retries {
                    error!(
                        symbol = %self.symbol,
                        error = %e,
                        attempts = self.connect_attempts,
                        "connection retries exhausted, feed is fatal"
                    );
                    self.transition(FeedState::Closed);
                    return Err(FeedError::RetriesExhausted {
                        attempts: self.connect_attempts,
                    });
                }

                let delay = self.backoff.next_delay();
                warn!(
                    symbol = %self.symbol,
                    error = %e,
                    attempt = self.connect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "connect failed, backing off"
                );
                tokio::select! {
                    () = sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
                Ok(())
            }
        }
    }

    async fn sync_step(&mut self, sink: &mut impl UpdateSink, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {}
            event = self.transport.next_event() => match event {
                Some(FeedEvent::Snapshot(snapshot)) => {
                    let applied = self.book.apply_snapshot(&snapshot);
                    info!(
                        symbol = %self.symbol,
                        update_id = snapshot.update_id,
                        bids = self.book.bid_depth(),
                        asks = self.book.ask_depth(),
                        buffered = self.buffered.len(),
                        "snapshot applied"
                    );
                    if applied {
                        sink.on_update(&self.book, Instant::now());
                    }
                    self.replay_buffered(sink);
                }
                Some(FeedEvent::Delta(delta)) => {
                    // The snapshot's marker is not known yet; hold the delta.
                    self.buffered.push(delta);
                }
                Some(FeedEvent::Disconnected { reason }) => {
                    warn!(symbol = %self.symbol, reason = %reason, "disconnected during sync");
                    self.transition(FeedState::Reconnecting);
                }
                None => self.transition(FeedState::Reconnecting),
            }
        }
    }

    /// Apply buffered deltas in order, dropping those the snapshot already
    /// covers, then go live. A gap inside the buffer means the snapshot is
    /// already unusable and forces a resync.
    fn replay_buffered(&mut self, sink: &mut impl UpdateSink) {
        let buffered = std::mem::take(&mut self.buffered);
        for delta in buffered {
            if delta.update_id <= self.book.last_update_id() {
                trace!(
                    symbol = %self.symbol,
                    update_id = delta.update_id,
                    "dropping delta covered by snapshot"
                );
                continue;
            }
            match self.book.apply_delta(&delta) {
                Ok(()) => sink.on_update(&self.book, Instant::now()),
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "gap in buffered deltas, resyncing");
                    self.transition(FeedState::Reconnecting);
                    return;
                }
            }
        }
        self.transition(FeedState::Live);
    }

    async fn live_step(&mut self, sink: &mut impl UpdateSink, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {}
            event = self.transport.next_event() => match event {
                Some(FeedEvent::Delta(delta)) => {
                    if delta.update_id <= self.book.last_update_id() {
                        // Feeds re-deliver around reconnects; already applied.
                        trace!(symbol = %self.symbol, update_id = delta.update_id, "skipping stale delta");
                        return;
                    }
                    match self.book.apply_delta(&delta) {
                        Ok(()) => sink.on_update(&self.book, Instant::now()),
                        Err(e) => {
                            warn!(symbol = %self.symbol, error = %e, "sequence gap, resynchronizing");
                            self.transition(FeedState::Reconnecting);
                        }
                    }
                }
                Some(FeedEvent::Snapshot(snapshot)) => {
                    // Unsolicited snapshot: adopt it only if it moves the book
                    // forward, emitting a single update.
                    debug!(symbol = %self.symbol, update_id = snapshot.update_id, "unsolicited snapshot");
                    if self.book.apply_snapshot(&snapshot) {
                        sink.on_update(&self.book, Instant::now());
                    }
                }
                Some(FeedEvent::Disconnected { reason }) => {
                    warn!(symbol = %self.symbol, reason = %reason, "connection lost");
                    self.transition(FeedState::Reconnecting);
                }
                None => self.transition(FeedState::Reconnecting),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookSnapshot;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    /// Scripted transport: a queue of connect outcomes and event batches.
    struct ScriptedTransport {
        /// Outcome per connect call; `true` connects, `false` fails.
        connects: VecDeque<bool>,
        /// Events replayed after each successful connect.
        sessions: VecDeque<VecDeque<FeedEvent>>,
        current: VecDeque<FeedEvent>,
        snapshot_requests: usize,
    }

    impl ScriptedTransport {
        fn new(connects: Vec<bool>, sessions: Vec<Vec<FeedEvent>>) -> Self {
            Self {
                connects: connects.into(),
                sessions: sessions.into_iter().map(Into::into).collect(),
                current: VecDeque::new(),
                snapshot_requests: 0,
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

        fn request_snapshot(&mut self) {
            self.snapshot_requests += 1;
        }

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

    fn config() -> ReconnectionConfig {
        ReconnectionConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
            max_retries: 3,
            restart_cooldown_ms: 1,
            max_pipeline_restarts: 2,
        }
    }

    fn snapshot(update_id: u64) -> FeedEvent {
        FeedEvent::Snapshot(BookSnapshot {
            update_id,
            bids: vec![(dec!(100), dec!(5))],
            asks: vec![(dec!(101), dec!(5))],
        })
    }

    fn delta(update_id: u64, bid_quantity: rust_decimal::Decimal) -> FeedEvent {
        FeedEvent::Delta(BookDelta::contiguous(
            update_id,
            vec![(dec!(100), bid_quantity)],
            vec![],
        ))
    }

    /// Sink recording the book's marker at each update.
    #[derive(Default)]
    struct Recorder {
        updates: Vec<u64>,
    }

    impl UpdateSink for Recorder {
        fn on_update(&mut self, book: &OrderBook, _at: Instant) {
            self.updates.push(book.last_update_id());
        }
    }

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn syncing_buffers_deltas_and_discards_covered_ones() {
        // Deltas 9..=12 arrive before the snapshot at 10; 9 and 10 must be
        // dropped, 11 and 12 replayed in order.
        let transport = ScriptedTransport::new(
            vec![true],
            vec![vec![
                delta(9, dec!(1)),
                delta(10, dec!(2)),
                delta(11, dec!(3)),
                delta(12, dec!(4)),
                snapshot(10),
            ]],
        );
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(async move {
            let _ = client.run(&mut recorder, rx).await;
            (client, recorder)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
        let (client, recorder) = handle.await.unwrap();

        assert_eq!(recorder.updates, vec![10, 11, 12]);
        assert_eq!(client.book().last_update_id(), 12);
        assert_eq!(client.state(), FeedState::Closed);
    }

    #[tokio::test]
    async fn gap_in_live_forces_resync_from_fresh_snapshot() {
        // First session: snapshot at 10, delta 11, then a gap (14 with
        // prev 13). Second session: fresh snapshot at 20.
        let transport = ScriptedTransport::new(
            vec![true, true],
            vec![
                vec![snapshot(10), delta(11, dec!(1)), delta(14, dec!(9))],
                vec![snapshot(20), delta(21, dec!(2))],
            ],
        );
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(async move {
            let _ = client.run(&mut recorder, rx).await;
            (client, recorder)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
        let (client, recorder) = handle.await.unwrap();

        // The gapped delta emitted nothing; the book was rebuilt at 20.
        assert_eq!(recorder.updates, vec![10, 11, 20, 21]);
        assert_eq!(client.book().last_update_id(), 21);
    }

    #[tokio::test]
    async fn backward_snapshot_in_live_neither_rewinds_nor_emits() {
        // An unsolicited snapshot behind the book's marker is dropped; the
        // book keeps its position and the sink sees nothing extra.
        let transport = ScriptedTransport::new(
            vec![true],
            vec![vec![snapshot(10), delta(11, dec!(1)), snapshot(5), delta(12, dec!(2))]],
        );
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(async move {
            let _ = client.run(&mut recorder, rx).await;
            (client, recorder)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
        let (client, recorder) = handle.await.unwrap();

        assert_eq!(recorder.updates, vec![10, 11, 12]);
        assert_eq!(client.book().last_update_id(), 12);
    }

    #[tokio::test]
    async fn stale_delta_in_live_is_skipped_without_resync() {
        let transport = ScriptedTransport::new(
            vec![true],
            vec![vec![snapshot(10), delta(11, dec!(1)), delta(11, dec!(7)), delta(12, dec!(2))]],
        );
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(async move {
            let _ = client.run(&mut recorder, rx).await;
            recorder
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
        let recorder = handle.await.unwrap();

        assert_eq!(recorder.updates, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_a_fatal_error() {
        let transport = ScriptedTransport::new(vec![false, false, false], vec![]);
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (_tx, rx) = shutdown_pair();

        let result = client.run(&mut recorder, rx).await;

        assert!(matches!(
            result,
            Err(FeedError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(client.state(), FeedState::Closed);
        assert!(recorder.updates.is_empty());
    }

    #[tokio::test]
    async fn connection_recovers_within_retry_budget() {
        let transport = ScriptedTransport::new(
            vec![false, true],
            vec![vec![snapshot(5), delta(6, dec!(1))]],
        );
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(async move {
            let _ = client.run(&mut recorder, rx).await;
            recorder
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
        let recorder = handle.await.unwrap();

        assert_eq!(recorder.updates, vec![5, 6]);
    }

    #[tokio::test]
    async fn shutdown_closes_the_client() {
        let transport = ScriptedTransport::new(vec![true], vec![vec![snapshot(10)]]);
        let mut client = FeedClient::new(Symbol::new("BTCUSDT"), transport, &config());
        let mut recorder = Recorder::default();
        let (tx, rx) = shutdown_pair();
        let _ = tx.send(true);

        let result = client.run(&mut recorder, rx).await;

        assert!(result.is_ok());
        assert_eq!(client.state(), FeedState::Closed);
    }
}
