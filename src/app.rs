//! Application supervisor.
//!
//! Owns one feed-to-dispatch pipeline per configured symbol. Pipelines share
//! nothing but the alert dispatcher, so a failure in one symbol cannot touch
//! another's book or alert state.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{AlertConfig, Config, FeedConfig, ReconnectionConfig};
use crate::domain::{
    AlertDecision, AlertMessage, AlertPolicy, AlertState, ImbalanceEngine, OrderBook, Symbol,
};
use crate::feed::binance::BinanceTransport;
use crate::feed::{FeedClient, UpdateSink};
use crate::notify::{AlertDispatcher, LogNotifier, Notifier};

#[cfg(feature = "telegram")]
use crate::notify::telegram::{TelegramConfig, TelegramNotifier};

/// Main application struct.
pub struct App;

impl App {
    /// Run until the shutdown signal fires or every symbol is lost.
    pub async fn run(config: Config, shutdown: watch::Receiver<bool>) -> crate::error::Result<()> {
        let notifier = build_notifier();
        let (dispatcher, dispatch_handle) =
            AlertDispatcher::spawn(notifier, config.dispatch.clone());

        info!(
            symbols = ?config.feed.symbols,
            depth = config.feed.depth,
            threshold = %config.alerts.threshold,
            "starting symbol pipelines"
        );

        let mut pipelines = Vec::new();
        for symbol in config.feed.symbols.clone() {
            pipelines.push((
                symbol.clone(),
                tokio::spawn(run_pipeline(
                    symbol,
                    config.feed.clone(),
                    config.alerts.clone(),
                    config.reconnection.clone(),
                    dispatcher.clone(),
                    shutdown.clone(),
                )),
            ));
        }
        // The worker drains only once every sender is gone.
        drop(dispatcher);

        let total = pipelines.len();
        let mut abandoned = 0usize;
        for (symbol, handle) in pipelines {
            match handle.await {
                Ok(PipelineExit::Shutdown) => {}
                Ok(PipelineExit::Abandoned) => abandoned += 1,
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "pipeline task failed");
                    abandoned += 1;
                }
            }
        }

        dispatch_handle.shutdown().await;

        let shutdown_requested = *shutdown.borrow();
        if !shutdown_requested && abandoned == total {
            return Err(crate::error::Error::AllPipelinesFailed);
        }
        Ok(())
    }
}

/// Why a symbol's pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineExit {
    /// Orderly close after a shutdown request.
    Shutdown,
    /// Restart budget exhausted; the symbol is lost for this process.
    Abandoned,
}

/// Run one symbol's pipeline, restarting it on fatal feed failure until the
/// restart budget runs out. Every restart rebuilds the whole pipeline: fresh
/// book, fresh alert state.
async fn run_pipeline(
    symbol: Symbol,
    feed: FeedConfig,
    alerts: AlertConfig,
    reconnection: ReconnectionConfig,
    dispatcher: AlertDispatcher,
    mut shutdown: watch::Receiver<bool>,
) -> PipelineExit {
    let mut restarts = 0u32;

    loop {
        let transport = BinanceTransport::new(
            symbol.clone(),
            feed.ws_url.clone(),
            feed.api_url.clone(),
            feed.snapshot_limit,
        );
        let mut client = FeedClient::new(symbol.clone(), transport, &reconnection);
        let mut sink = PipelineSink::new(&alerts, feed.depth, dispatcher.clone());

        match client.run(&mut sink, shutdown.clone()).await {
            Ok(()) => {
                info!(symbol = %symbol, "pipeline closed");
                return PipelineExit::Shutdown;
            }
            Err(e) => {
                restarts += 1;
                if restarts > reconnection.max_pipeline_restarts {
                    error!(
                        symbol = %symbol,
                        error = %e,
                        restarts,
                        "restart budget exhausted, abandoning symbol"
                    );
                    return PipelineExit::Abandoned;
                }

                let cooldown = reconnection.restart_cooldown();
                error!(
                    symbol = %symbol,
                    error = %e,
                    restart = restarts,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "pipeline failed, restarting"
                );
                tokio::select! {
                    () = sleep(cooldown) => {}
                    _ = shutdown.changed() => return PipelineExit::Shutdown,
                }
            }
        }
    }
}

/// Book update -> imbalance sample -> alert decision -> dispatch.
struct PipelineSink {
    engine: ImbalanceEngine,
    policy: AlertPolicy,
    state: AlertState,
    dispatcher: AlertDispatcher,
}

impl PipelineSink {
    fn new(alerts: &AlertConfig, depth: usize, dispatcher: AlertDispatcher) -> Self {
        Self {
            engine: ImbalanceEngine::new(depth),
            policy: AlertPolicy::new(alerts.threshold, alerts.cooldown()),
            state: AlertState::default(),
            dispatcher,
        }
    }
}

impl UpdateSink for PipelineSink {
    fn on_update(&mut self, book: &OrderBook, at: Instant) {
        let Some(sample) = self.engine.on_update(book, at) else {
            return;
        };

        if self.policy.evaluate(&sample, &mut self.state, at) == AlertDecision::Fire {
            info!(
                symbol = %sample.symbol,
                ratio = %sample.ratio,
                bid_volume = %sample.bid_volume,
                ask_volume = %sample.ask_volume,
                "imbalance threshold crossed, dispatching alert"
            );
            self.dispatcher
                .dispatch(AlertMessage::from_sample(&sample, self.policy.threshold()));
        }
    }
}

#[cfg(feature = "telegram")]
fn build_notifier() -> Arc<dyn Notifier> {
    match TelegramConfig::from_env() {
        Some(config) => Arc::new(TelegramNotifier::new(&config)),
        None => {
            warn!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(not(feature = "telegram"))]
fn build_notifier() -> Arc<dyn Notifier> {
    warn!("built without the telegram feature, alerts will only be logged");
    Arc::new(LogNotifier)
}
