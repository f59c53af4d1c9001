//! The strategy engine port (`spec.md` §1 Non-goals: "the core is not a
//! strategy engine" — this crate consumes one as an external collaborator
//! and never implements trade selection itself).

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use model::occ::OptionRight;
use rust_decimal::Decimal;

/// One leg a [`StrategyEngine`] proposes for a new entry.
#[derive(Debug, Clone)]
pub struct ProposedLeg {
    /// Put or call.
    pub right: OptionRight,
    /// Strike price.
    pub strike: Decimal,
    /// Expected premium per contract.
    pub expected_premium: Decimal,
}

/// The strategy engine's verdict for one symbol on one trading day
/// (`spec.md` §4.5 "Trade Engine").
#[derive(Debug, Clone)]
pub struct TradingDecision {
    /// Whether a new entry should be placed today.
    pub can_trade: bool,
    /// Human-readable strategy label, e.g. `"short-strangle"`.
    pub strategy: String,
    /// Number of contracts per leg.
    pub contracts: u32,
    /// Shared expiration date for every leg.
    pub expiration: NaiveDate,
    /// The put leg, if this strategy sells/buys one.
    pub put_leg: Option<ProposedLeg>,
    /// The call leg, if this strategy sells/buys one.
    pub call_leg: Option<ProposedLeg>,
}

/// External collaborator that decides whether and how to enter a new
/// position. Deliberately abstract: this crate only consumes the decision.
#[async_trait]
pub trait StrategyEngine: Send + Sync {
    /// Decide whether to enter a new trade for `symbol` as of `now`.
    async fn decide(&self, symbol: &str, now: chrono::DateTime<Utc>) -> anyhow::Result<TradingDecision>;
}
