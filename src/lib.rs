//! Tiltwatch - live order-book imbalance monitoring.
//!
//! Maintains a per-symbol order book from a streaming depth feed, derives a
//! bounded-depth imbalance ratio on every update, and sends rate-limited
//! Telegram alerts when the ratio crosses a configured threshold.
//!
//! # Architecture
//!
//! Each configured symbol gets its own pipeline, run as an independent task:
//!
//! ```text
//! depth stream -> FeedClient -> OrderBook -> ImbalanceEngine
//!                                               -> AlertPolicy -> AlertDispatcher -> notifier
//! ```
//!
//! Pipelines share nothing but the alert dispatcher, so a resync or failure
//! on one symbol never disturbs another. Within a pipeline, updates are
//! processed strictly in feed order; the only background work is alert
//! delivery.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML with validation
//! - [`domain`] - Order book, imbalance calculation, alert policy
//! - [`error`] - Error types for the crate
//! - [`feed`] - Feed transport abstraction, Binance implementation, and the
//!   per-symbol client state machine
//! - [`notify`] - Notifier trait, Telegram implementation, alert dispatcher
//! - [`app`] - Supervisor wiring pipelines together
//!
//! # Features
//!
//! - `telegram` - Telegram alert delivery (enabled by default)

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod notify;
