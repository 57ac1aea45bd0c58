//! Market data feed: transport abstraction and the per-symbol client that
//! keeps the order book synchronized.

pub mod binance;
pub mod client;

use async_trait::async_trait;

use crate::domain::{BookDelta, BookSnapshot};
use crate::error::FeedError;

pub use client::{FeedClient, FeedState, UpdateSink};

/// Events surfaced by a feed transport.
#[derive(Debug)]
pub enum FeedEvent {
    /// A full book snapshot, produced after [`FeedTransport::request_snapshot`].
    Snapshot(BookSnapshot),
    /// An incremental depth update.
    Delta(BookDelta),
    /// The transport lost its connection; the client decides what to do.
    Disconnected { reason: String },
}

/// One streaming market data connection for a single symbol.
///
/// Implementations own the wire protocol; the [`FeedClient`] owns sequencing,
/// buffering, and recovery.
#[async_trait]
pub trait FeedTransport: Send {
    /// Open the transport and subscribe to the symbol's depth stream.
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Begin fetching a full snapshot; the result arrives through
    /// [`FeedTransport::next_event`] as [`FeedEvent::Snapshot`], while deltas
    /// keep flowing in the meantime.
    fn request_snapshot(&mut self);

    /// Next inbound event. `None` means the transport is not connected.
    async fn next_event(&mut self) -> Option<FeedEvent>;

    /// Tear down the connection. Safe to call when already closed.
    async fn close(&mut self);

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}
