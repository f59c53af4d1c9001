use crate::occ::OptionRight;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Directional bias of a paper trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    /// Net-short premium strategy (e.g. short strangle).
    Short,
    /// Net-long premium strategy.
    Long,
    /// Delta-neutral / range strategy.
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bias::Short => "short",
            Bias::Long => "long",
            Bias::Neutral => "neutral",
        })
    }
}

/// One leg of a paper trade (`spec.md` §3: "up to two legs each with
/// {strike, type PUT/CALL, premium, optional broker conid, optional delta
/// at entry}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTradeLeg {
    /// Strike price of this leg.
    pub strike: Decimal,
    /// Put or call.
    pub right: OptionRight,
    /// Premium collected (short) or paid (long) for this leg at entry.
    pub premium: Decimal,
    /// Broker conid, once resolved.
    pub conid: Option<i64>,
    /// Delta observed at entry, used as the 0DTE closer's last-resort
    /// fallback (`spec.md` §4.5).
    pub delta_at_entry: Option<Decimal>,
}

/// Lifecycle status of a [`PaperTrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperTradeStatus {
    /// Entry orders confirmed, position live.
    Open,
    /// Closed by a monitor, reconciliation, or manual action.
    Closed,
    /// Reached expiration without a matching broker position.
    Expired,
    /// Counterparty exercised; a stock position was assigned.
    Exercised,
}

impl fmt::Display for PaperTradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaperTradeStatus::Open => "open",
            PaperTradeStatus::Closed => "closed",
            PaperTradeStatus::Expired => "expired",
            PaperTradeStatus::Exercised => "exercised",
        })
    }
}

/// Recorded once an assignment is detected on a trade
/// (`spec.md` §4.5 "Assignment Monitor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDetails {
    /// Shares assigned (`contracts * 100`).
    pub shares_assigned: u32,
    /// Strike at which assignment occurred.
    pub strike: Decimal,
    /// Spot price at the prior close, used to classify ITM.
    pub spot_price_at_close: Decimal,
    /// Number of liquidation attempts made so far.
    pub attempts: u32,
    /// When liquidation fully completed, if it has.
    pub liquidated_at: Option<DateTime<Utc>>,
}

/// A logical options position spanning up to two legs
/// (`spec.md` §3 "PaperTrade").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    /// Locally generated id.
    pub id: Uuid,
    /// Owning user id.
    pub user_id: String,
    /// Underlying ticker.
    pub symbol: String,
    /// Free-form strategy label (e.g. "short-strangle").
    pub strategy: String,
    /// Directional bias.
    pub bias: Bias,
    /// Contract count (applies to each leg equally).
    pub contracts: u32,
    /// Put leg, if this strategy carries one.
    pub put_leg: Option<PaperTradeLeg>,
    /// Call leg, if this strategy carries one.
    pub call_leg: Option<PaperTradeLeg>,
    /// Sum of premium across all legs at entry.
    pub entry_premium_total: Decimal,
    /// Shared expiration date for both legs.
    pub expiration: NaiveDate,
    /// Lifecycle status.
    pub status: PaperTradeStatus,
    /// Average exit price, once closed.
    pub exit_price: Option<Decimal>,
    /// Human-readable reason the trade closed.
    pub exit_reason: Option<String>,
    /// Realized profit or loss once closed.
    pub realized_pnl: Option<Decimal>,
    /// Present once an assignment has been detected.
    pub assignment: Option<AssignmentDetails>,
    /// When the trade was opened.
    pub created_at: DateTime<Utc>,
    /// When the trade was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Which job/path created this trade (e.g. "trade-engine").
    pub source: String,
}

impl PaperTrade {
    /// Iterate the legs that are actually present, in put-then-call order
    /// (`spec.md` §5 ordering guarantee: "put leg, then call leg").
    pub fn legs(&self) -> impl Iterator<Item = &PaperTradeLeg> {
        self.put_leg.iter().chain(self.call_leg.iter())
    }

    /// True while the position is still live.
    pub fn is_open(&self) -> bool {
        matches!(self.status, PaperTradeStatus::Open)
    }
}
