//! Order book state for a single symbol.
//!
//! The book is exclusively owned and mutated by its feed client; everything
//! downstream only reads it through shared references.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::symbol::Symbol;
use crate::error::FeedError;

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    price: Decimal,
    quantity: Decimal,
}

impl PriceLevel {
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }
}

/// A full book replacement tagged with its sequence marker.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// An incremental set of level changes relative to a known sequence marker.
///
/// `prev_update_id` is the marker the delta continues from; a delta is
/// applicable when it equals the book's current `last_update_id`, or precedes
/// it while `update_id` is still ahead (feeds re-cover already-applied ranges
/// around a snapshot boundary, and level quantities are absolute).
#[derive(Debug, Clone)]
pub struct BookDelta {
    pub prev_update_id: u64,
    pub update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

impl BookDelta {
    /// Delta whose id directly succeeds the previous message's id, for feeds
    /// with one sequence number per message.
    #[must_use]
    pub fn contiguous(
        update_id: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    ) -> Self {
        Self {
            prev_update_id: update_id.saturating_sub(1),
            update_id,
            bids,
            asks,
        }
    }
}

/// Live order book for a single symbol.
///
/// Bids and asks are ordered maps from price to quantity; a quantity of zero
/// removes the level instead of persisting a zero entry.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: Symbol,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
}

impl OrderBook {
    /// Create a new empty order book.
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    #[must_use]
    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Replace both sides wholesale and take over the snapshot's marker.
    ///
    /// Returns `false` without touching the book when the snapshot does not
    /// move the marker forward, so callers emit no duplicate update and the
    /// marker stays monotonically non-decreasing.
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) -> bool {
        if snapshot.update_id <= self.last_update_id {
            return false;
        }

        self.bids.clear();
        self.asks.clear();
        for &(price, quantity) in &snapshot.bids {
            if !quantity.is_zero() {
                self.bids.insert(price, quantity);
            }
        }
        for &(price, quantity) in &snapshot.asks {
            if !quantity.is_zero() {
                self.asks.insert(price, quantity);
            }
        }
        self.last_update_id = snapshot.update_id;
        true
    }

    /// Merge an incremental update, advancing the sequence marker.
    ///
    /// Fails with [`FeedError::SequenceGap`] when the delta is not the
    /// expected successor of the book's marker. Rejection happens before any
    /// mutation, so a failed delta leaves the book unchanged.
    pub fn apply_delta(&mut self, delta: &BookDelta) -> Result<(), FeedError> {
        if delta.prev_update_id > self.last_update_id || delta.update_id <= self.last_update_id {
            return Err(FeedError::SequenceGap {
                last_update_id: self.last_update_id,
                delta_prev: delta.prev_update_id,
                delta_last: delta.update_id,
            });
        }

        for &(price, quantity) in &delta.bids {
            if quantity.is_zero() {
                self.bids.remove(&price);
            } else {
                self.bids.insert(price, quantity);
            }
        }
        for &(price, quantity) in &delta.asks {
            if quantity.is_zero() {
                self.asks.remove(&price);
            } else {
                self.asks.insert(price, quantity);
            }
        }
        self.last_update_id = delta.update_id;
        Ok(())
    }

    /// Up to `n` best levels on one side, in that side's sort order.
    ///
    /// A thin book yields fewer than `n` levels; that is valid input for
    /// callers, not an error.
    #[must_use]
    pub fn top_levels(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        match side {
            Side::Bid => self
                .bids
                .iter()
                .rev()
                .take(n)
                .map(|(&price, &quantity)| PriceLevel::new(price, quantity))
                .collect(),
            Side::Ask => self
                .asks
                .iter()
                .take(n)
                .map(|(&price, &quantity)| PriceLevel::new(price, quantity))
                .collect(),
        }
    }

    /// Best bid (highest buy price).
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &quantity)| PriceLevel::new(price, quantity))
    }

    /// Best ask (lowest sell price).
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &quantity)| PriceLevel::new(price, quantity))
    }

    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }
}
