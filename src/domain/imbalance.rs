//! Imbalance ratio computation over the top of the book.

use std::time::Instant;

use rust_decimal::Decimal;

use super::book::{OrderBook, Side};
use super::symbol::Symbol;

/// One imbalance measurement, produced per applied book update.
#[derive(Debug, Clone)]
pub struct ImbalanceSample {
    pub symbol: Symbol,
    /// `(bid_volume - ask_volume) / (bid_volume + ask_volume)`, in `[-1, 1]`.
    /// Positive means buy-side pressure.
    pub ratio: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// Monotonic receipt timestamp of the underlying book update.
    pub at: Instant,
}

/// Derives [`ImbalanceSample`]s from book updates.
#[derive(Debug, Clone)]
pub struct ImbalanceEngine {
    depth: usize,
}

impl ImbalanceEngine {
    #[must_use]
    pub const fn new(depth: usize) -> Self {
        Self { depth }
    }

    /// Compute the imbalance over the top-N levels of each side.
    ///
    /// Returns `None` when both sides are empty: zero combined volume carries
    /// no imbalance signal, and emitting a zero ratio would be misleading.
    #[must_use]
    pub fn on_update(&self, book: &OrderBook, at: Instant) -> Option<ImbalanceSample> {
        let bid_volume: Decimal = book
            .top_levels(Side::Bid, self.depth)
            .iter()
            .map(|level| level.quantity())
            .sum();
        let ask_volume: Decimal = book
            .top_levels(Side::Ask, self.depth)
            .iter()
            .map(|level| level.quantity())
            .sum();

        let total = bid_volume + ask_volume;
        if total.is_zero() {
            return None;
        }

        Some(ImbalanceSample {
            symbol: book.symbol().clone(),
            ratio: (bid_volume - ask_volume) / total,
            bid_volume,
            ask_volume,
            at,
        })
    }
}
