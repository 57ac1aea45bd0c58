//! Alert threshold and cooldown evaluation.
//!
//! The policy is a pure decision function over explicit state plus an
//! injected `now`, so tests never depend on real time.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use rust_decimal::Decimal;

use super::imbalance::ImbalanceSample;
use super::symbol::Symbol;

/// Per-symbol alert bookkeeping, owned by the symbol's pipeline.
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    threshold_crossed_since: Option<Instant>,
    last_alert_at: Option<Instant>,
}

impl AlertState {
    /// When the current threshold crossing began, if one is active.
    #[must_use]
    pub fn threshold_crossed_since(&self) -> Option<Instant> {
        self.threshold_crossed_since
    }

    #[must_use]
    pub fn last_alert_at(&self) -> Option<Instant> {
        self.last_alert_at
    }
}

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    Fire,
    Suppress,
}

/// Threshold/cooldown evaluator.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    threshold: Decimal,
    cooldown: Duration,
}

impl AlertPolicy {
    #[must_use]
    pub const fn new(threshold: Decimal, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> Decimal {
        self.threshold
    }

    /// Decide whether a sample fires an alert.
    ///
    /// Fires when `|ratio|` exceeds the threshold and the cooldown since the
    /// last fire has elapsed. `last_alert_at` is recorded here, before any
    /// dispatch happens, so a burst of samples arriving while a send is in
    /// flight cannot re-trigger. Dropping back below the threshold does not
    /// reset the cooldown; it is purely time-based.
    pub fn evaluate(
        &self,
        sample: &ImbalanceSample,
        state: &mut AlertState,
        now: Instant,
    ) -> AlertDecision {
        if sample.ratio.abs() <= self.threshold {
            state.threshold_crossed_since = None;
            return AlertDecision::Suppress;
        }

        state.threshold_crossed_since.get_or_insert(now);

        let cooled_down = state
            .last_alert_at
            .map_or(true, |last| now.duration_since(last) >= self.cooldown);
        if !cooled_down {
            return AlertDecision::Suppress;
        }

        state.last_alert_at = Some(now);
        AlertDecision::Fire
    }
}

/// A fired alert, formatted for the notifier on render.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub symbol: Symbol,
    pub ratio: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub threshold: Decimal,
    pub at: DateTime<Local>,
}

impl AlertMessage {
    #[must_use]
    pub fn from_sample(sample: &ImbalanceSample, threshold: Decimal) -> Self {
        Self {
            symbol: sample.symbol.clone(),
            ratio: sample.ratio,
            bid_volume: sample.bid_volume,
            ask_volume: sample.ask_volume,
            threshold,
            at: Local::now(),
        }
    }

    /// Render the notification text.
    #[must_use]
    pub fn render(&self) -> String {
        let direction = if self.ratio > Decimal::ZERO {
            "🟢 Buyers advantage"
        } else {
            "🔴 Sellers advantage"
        };

        format!(
            "⚠️ Imbalance Alert\n\n\
             Symbol: {}\n\
             Imbalance Ratio: {:.4}\n\
             Direction: {}\n\
             Threshold: |{:.4}| > {:.4}\n\
             Time: {}",
            self.symbol.display_pair(),
            self.ratio,
            direction,
            self.ratio,
            self.threshold,
            self.at.format("%H:%M:%S"),
        )
    }
}
