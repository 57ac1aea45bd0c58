//! Outbound alert delivery.
//!
//! [`AlertDispatcher`] serializes access to the notifier: pipelines hand it
//! fired alerts and move on, a background worker delivers each alert as its
//! own task with bounded retry. A failing notifier never blocks ingestion.

#[cfg(feature = "telegram")]
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::domain::AlertMessage;
use crate::error::NotifyError;

/// Message delivery seam.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message. A `Transient` error invites a retry, a
    /// `Permanent` one does not.
    async fn send(&self, text: &str) -> Result<(), NotifyError>;

    /// Notifier name for logging.
    fn name(&self) -> &'static str;
}

/// Logs alerts instead of delivering them; used when no notifier is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(alert = %text, "alert (log only)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Handle pipelines use to submit fired alerts. Cheap to clone.
#[derive(Clone)]
pub struct AlertDispatcher {
    sender: mpsc::UnboundedSender<AlertMessage>,
}

impl AlertDispatcher {
    /// Spawn the dispatch worker. The returned [`DispatcherHandle`] joins it
    /// during shutdown.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> (Self, DispatcherHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let grace = config.shutdown_grace();
        let worker = tokio::spawn(dispatch_worker(notifier, config, receiver));
        (Self { sender }, DispatcherHandle { worker, grace })
    }

    /// Queue an alert for delivery. Never blocks the caller.
    pub fn dispatch(&self, message: AlertMessage) {
        if self.sender.send(message).is_err() {
            warn!("alert dispatcher channel closed, dropping alert");
        }
    }
}

/// Owns the worker task for orderly shutdown.
pub struct DispatcherHandle {
    worker: JoinHandle<()>,
    grace: Duration,
}

impl DispatcherHandle {
    /// Wait for in-flight sends to finish, up to the grace period, then
    /// abandon whatever remains. All dispatcher clones must be dropped first
    /// or the worker never drains.
    pub async fn shutdown(self) {
        match timeout(self.grace, self.worker).await {
            Ok(Ok(())) => info!("alert dispatcher drained"),
            Ok(Err(e)) => error!(error = %e, "alert dispatcher worker failed"),
            Err(_) => warn!(
                grace_ms = self.grace.as_millis() as u64,
                "shutdown grace elapsed, abandoning in-flight alert sends"
            ),
        }
    }
}

/// Background worker: one delivery task per alert, so a slow send for one
/// symbol never delays another's.
async fn dispatch_worker(
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    mut receiver: mpsc::UnboundedReceiver<AlertMessage>,
) {
    info!(notifier = notifier.name(), "alert dispatcher started");
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => {
                    in_flight.spawn(deliver(notifier.clone(), config.clone(), message));
                }
                None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    // All senders dropped: drain the remaining sends.
    while in_flight.join_next().await.is_some() {}
    info!("alert dispatcher stopped");
}

/// Deliver one alert with bounded exponential retry. Exhaustion logs and
/// drops; a lost alert must never take the pipeline down.
async fn deliver(notifier: Arc<dyn Notifier>, config: DispatchConfig, message: AlertMessage) {
    let text = message.render();
    let mut delay = Duration::from_millis(config.initial_delay_ms);

    for attempt in 1..=config.max_attempts {
        match notifier.send(&text).await {
            Ok(()) => {
                info!(
                    symbol = %message.symbol,
                    ratio = %message.ratio,
                    attempt,
                    "alert delivered"
                );
                return;
            }
            Err(NotifyError::Permanent(reason)) => {
                error!(
                    symbol = %message.symbol,
                    reason = %reason,
                    "permanent notifier error, dropping alert"
                );
                return;
            }
            Err(NotifyError::Transient(reason)) => {
                if attempt == config.max_attempts {
                    break;
                }
                warn!(
                    symbol = %message.symbol,
                    reason = %reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient notifier error, retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(config.max_delay_ms));
            }
        }
    }

    error!(
        symbol = %message.symbol,
        attempts = config.max_attempts,
        "alert dropped after exhausted retries"
    );
}
