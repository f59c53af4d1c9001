use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// BUY or SELL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy to open/close.
    Buy,
    /// Sell to open/close.
    Sell,
}

impl OrderSide {
    /// The opposite side, used when closing a position (`spec.md` §4.5).
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        })
    }
}

/// Order type as sent to the broker (`spec.md` §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order; requires `limit_price`.
    Limit,
    /// Stop order; used for bracket stops.
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
            OrderType::Stop => "STP",
        })
    }
}

/// Time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good for the current trading day only.
    Day,
    /// Good until cancelled.
    Gtc,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeInForce::Day => "DAY",
            TimeInForce::Gtc => "GTC",
        })
    }
}

/// Ledger status of an [`OrderRecord`] (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the broker, not yet known to be filled.
    Submitted,
    /// Fully filled.
    Filled,
    /// Partially filled.
    Partial,
    /// Cancelled, either by us or observed gone at the broker.
    Cancelled,
    /// Rejected by the broker; terminal.
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::Filled => "filled",
            OrderStatus::Partial => "partial",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        })
    }
}

/// The order ledger entity (`spec.md` §3 "OrderRecord").
///
/// Invariant: `broker_order_id` must be numeric when present. A record
/// whose id fails to parse as an integer is local-only and must never be
/// sent as a cancel target (`spec.md` §9 open question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Locally generated id, stable for the lifetime of the record.
    pub id: Uuid,
    /// Broker-assigned order id, once known. `None` until a submission
    /// response yields one (`spec.md` §4.3 step 4 may leave this unset).
    pub broker_order_id: Option<String>,
    /// OCC-style symbol for options, plain ticker for stocks.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Contract or share quantity.
    pub quantity: u32,
    /// Market, limit, or stop.
    pub order_type: OrderType,
    /// Required when `order_type == Limit`.
    pub limit_price: Option<Decimal>,
    /// The parent order id, for a bracket child.
    pub parent_id: Option<Uuid>,
    /// Child order ids (e.g. the bracket stop), for a parent.
    pub child_ids: Vec<Uuid>,
    /// Current ledger status.
    pub status: OrderStatus,
    /// When this order was submitted to the broker.
    pub submitted_at: DateTime<Utc>,
    /// When a fill was observed, if any.
    pub filled_at: Option<DateTime<Utc>>,
    /// Average fill price, if filled.
    pub fill_price: Option<Decimal>,
    /// The paper-trade this order belongs to.
    pub paper_trade_id: Option<Uuid>,
}

impl OrderRecord {
    /// A freshly submitted order record, not yet known to be filled.
    pub fn new_submitted(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: u32,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            broker_order_id: None,
            symbol: symbol.into(),
            side,
            quantity,
            order_type,
            limit_price,
            parent_id: None,
            child_ids: Vec::new(),
            status: OrderStatus::Submitted,
            submitted_at,
            filled_at: None,
            fill_price: None,
            paper_trade_id: None,
        }
    }

    /// True when `broker_order_id` is present and parses as an integer
    /// (i.e. a genuine broker-assigned id, eligible as a cancel target).
    pub fn has_numeric_broker_id(&self) -> bool {
        self.broker_order_id
            .as_deref()
            .is_some_and(|id| id.parse::<i64>().is_ok())
    }
}

/// Trims and rejects the sentinel strings the broker sometimes returns in
/// place of a real order id (`spec.md` §4.3 step 4).
pub fn is_rejected_order_id_sentinel(raw: &str) -> bool {
    matches!(raw.trim(), "" | "undefined" | "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn opposite_side_flips() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn numeric_broker_id_detection() {
        let mut order = OrderRecord::new_submitted(
            "SPY",
            OrderSide::Sell,
            1,
            OrderType::Limit,
            None,
            DateTime::<Utc>::MIN_UTC,
        );
        assert!(!order.has_numeric_broker_id());
        order.broker_order_id = Some("987654".into());
        assert!(order.has_numeric_broker_id());
        order.broker_order_id = Some(Uuid::new_v4().to_string());
        assert!(!order.has_numeric_broker_id());
    }

    #[test]
    fn sentinel_order_ids_are_rejected() {
        assert!(is_rejected_order_id_sentinel(""));
        assert!(is_rejected_order_id_sentinel("undefined"));
        assert!(is_rejected_order_id_sentinel("null"));
        assert!(is_rejected_order_id_sentinel("  "));
        assert!(!is_rejected_order_id_sentinel("987654"));
    }
}
