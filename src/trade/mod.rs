//! Paper trading on detected patterns
//!
//! The [`TradeCandidateController`] turns newly formed patterns into
//! candidates, one per configured `(buy_trigger, trade_strategy)` pair. Each
//! admitted candidate becomes a [`Trade`] that watches its [`BuyBox`] for
//! entry and then rides a [`TradeBox`] until stop, limit or time runs out.

pub mod candidate;
pub mod machine;
pub mod trade_box;

pub use candidate::{TradeCandidate, TradeCandidateController};
pub use machine::{CancelReason, SellReason, Trade, TradeEvent, TradeId, TradeState};
pub use trade_box::{BoxGeometry, BoxStep, BuyBox, BuySignal, TradeBox};
