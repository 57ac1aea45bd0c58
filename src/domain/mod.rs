//! Exchange-agnostic core: the per-symbol order book, the imbalance
//! calculation, and the alert decision logic.

mod alert;
mod book;
mod imbalance;
mod symbol;

pub use alert::{AlertDecision, AlertMessage, AlertPolicy, AlertState};
pub use book::{BookDelta, BookSnapshot, OrderBook, PriceLevel, Side};
pub use imbalance::{ImbalanceEngine, ImbalanceSample};
pub use symbol::Symbol;
