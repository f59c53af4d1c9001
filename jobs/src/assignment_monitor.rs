//! Assignment Monitor (`spec.md` §4.5): cron `5 4 * * 1-5` ET, pre-market.
//! Detects a newly appeared stock position sized at `contracts * 100`
//! against a recently expired ITM leg, then works a limit order down
//! toward the market until it fills or the attempt budget runs out.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use model::calendar::MarketCalendar;
use model::occ::OptionRight;
use model::order::{OrderRecord, OrderSide};
use model::paper_trade::{AssignmentDetails, PaperTrade};
use model::persistence::PaperTradeRead;
use model::JobResult;
use orders::OrderService;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scheduler::JobHandler;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// How many calendar days back the monitor looks for a recently expired
/// leg, to cover a Monday run catching a Friday expiration.
const LOOKBACK_DAYS: i64 = 3;
/// Hard ceiling on one detection's liquidation attempts
/// (`spec.md` §4.5: "bounded by 5 attempts or 1 h").
const MAX_ATTEMPTS: u32 = 5;
/// Wall-clock ceiling on one detection's liquidation loop.
const MAX_DURATION: ChronoDuration = ChronoDuration::hours(1);
/// Delay between cancel-and-resubmit attempts (`spec.md` §4.5: "every
/// ~30 s").
const RETRY_INTERVAL: Duration = Duration::from_secs(30);
/// Spread-over-mid threshold above which the reduction step is doubled
/// (`spec.md` §4.5: "larger reduction when spread > 0.5%").
const WIDE_SPREAD_THRESHOLD: Decimal = dec!(0.005);

/// Decides how far below bid (or above ask) each liquidation attempt
/// reaches, as a fraction of the quote.
pub trait AssignmentPricingPolicy: Send + Sync {
    /// Reduction fraction for a given 1-indexed `attempt`, given the
    /// current bid-ask spread as a fraction of the mid price.
    fn reduction_fraction(&self, attempt: u32, spread_fraction: Decimal) -> Decimal;
}

/// The heuristic percent table from `spec.md` §4.5: 0.1%, 0.2%, … per
/// attempt, doubled once the spread is wide.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAssignmentPricing;

impl AssignmentPricingPolicy for DefaultAssignmentPricing {
    fn reduction_fraction(&self, attempt: u32, spread_fraction: Decimal) -> Decimal {
        let base = Decimal::from(attempt) * dec!(0.001);
        if spread_fraction > WIDE_SPREAD_THRESHOLD {
            base * dec!(2)
        } else {
            base
        }
    }
}

/// Detects and liquidates newly assigned stock positions.
pub struct AssignmentMonitor {
    user_id: String,
    calendar: Arc<dyn MarketCalendar>,
    paper_trades: Arc<dyn PaperTradeRead>,
    order_service: Arc<OrderService>,
    pricing: Arc<dyn AssignmentPricingPolicy>,
}

impl AssignmentMonitor {
    /// Construct a monitor bound to one user's trades and order service,
    /// using the default reduction schedule.
    pub fn new(
        user_id: impl Into<String>,
        calendar: Arc<dyn MarketCalendar>,
        paper_trades: Arc<dyn PaperTradeRead>,
        order_service: Arc<OrderService>,
    ) -> Self {
        Self::with_pricing(user_id, calendar, paper_trades, order_service, Arc::new(DefaultAssignmentPricing))
    }

    /// Construct a monitor with a custom reduction schedule.
    pub fn with_pricing(
        user_id: impl Into<String>,
        calendar: Arc<dyn MarketCalendar>,
        paper_trades: Arc<dyn PaperTradeRead>,
        order_service: Arc<OrderService>,
        pricing: Arc<dyn AssignmentPricingPolicy>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            calendar,
            paper_trades,
            order_service,
            pricing,
        }
    }

    async fn candidate_trades(&self, today: chrono::NaiveDate) -> anyhow::Result<Vec<PaperTrade>> {
        let mut found = Vec::new();
        for offset in 1..=LOOKBACK_DAYS {
            let date = today - ChronoDuration::days(offset);
            let trades = self.paper_trades.list_trades_expiring_on(&self.user_id, date).await?;
            found.extend(trades.into_iter().filter(|t| t.assignment.is_none()));
        }
        Ok(found)
    }

    /// True when the expired leg would have finished in-the-money, given
    /// the spot observed at the prior close.
    fn is_itm(right: OptionRight, strike: Decimal, spot_at_close: Decimal) -> bool {
        match right {
            OptionRight::Put => spot_at_close < strike,
            OptionRight::Call => spot_at_close > strike,
        }
    }

    async fn detect_and_liquidate(&self, trade: &PaperTrade) -> anyhow::Result<Option<AssignmentDetails>> {
        let positions = self.order_service.get_positions().await?;
        let expected_shares = trade.contracts.saturating_mul(100);

        let Some(stock_position) = positions.iter().find(|p| p.symbol == trade.symbol) else {
            return Ok(None);
        };
        let observed_shares = stock_position.position.abs().trunc().to_i64().and_then(|q| u32::try_from(q).ok()).unwrap_or(0);
        if observed_shares != expected_shares {
            return Ok(None);
        }

        let spot = self.order_service.get_spot_price(&trade.symbol).await?.unwrap_or(Decimal::ZERO);
        let assigned_leg = trade
            .legs()
            .find(|leg| Self::is_itm(leg.right, leg.strike, spot))
            .or_else(|| trade.legs().next());
        let Some(assigned_leg) = assigned_leg else {
            return Ok(None);
        };

        let side = if stock_position.position.is_sign_negative() { OrderSide::Buy } else { OrderSide::Sell };
        let attempts = self.liquidate(&trade.symbol, side, observed_shares).await;

        Ok(Some(AssignmentDetails {
            shares_assigned: observed_shares,
            strike: assigned_leg.strike,
            spot_price_at_close: spot,
            attempts,
            liquidated_at: None,
        }))
    }

    /// Work a limit order toward the market, cancelling and resubmitting
    /// at a wider reduction each attempt, until the attempt/time budget
    /// is spent. Returns the number of attempts made.
    async fn liquidate(&self, symbol: &str, side: OrderSide, quantity: u32) -> u32 {
        let start = Utc::now();
        let mut working_order: Option<OrderRecord> = None;
        let mut attempt = 0;

        while attempt < MAX_ATTEMPTS && Utc::now() - start < MAX_DURATION {
            attempt += 1;

            let quote = match self.order_service.get_spot_quote(symbol).await {
                Ok(Some(quote)) => quote,
                _ => {
                    warn!(symbol, attempt, "assignment monitor: no quote available this attempt");
                    sleep(RETRY_INTERVAL).await;
                    continue;
                }
            };
            let (Some(bid), Some(ask)) = (quote.bid, quote.ask) else {
                sleep(RETRY_INTERVAL).await;
                continue;
            };
            let mid = (bid + ask) / dec!(2);
            let spread_fraction = if mid.is_zero() { Decimal::ZERO } else { (ask - bid) / mid };
            let reduction = self.pricing.reduction_fraction(attempt, spread_fraction);

            let limit_price = match side {
                OrderSide::Sell => bid * (Decimal::ONE - reduction),
                OrderSide::Buy => ask * (Decimal::ONE + reduction),
            };

            if let Some(previous) = &working_order {
                if let Err(err) = self.order_service.cancel_order(previous).await {
                    warn!(symbol, attempt, error = %err, "assignment monitor: failed to cancel previous attempt");
                }
            }

            match self.order_service.place_stock_limit_order_outside_rth(symbol, side, quantity, limit_price).await {
                Ok(record) => working_order = Some(record),
                Err(err) => warn!(symbol, attempt, error = %err, "assignment monitor: liquidation attempt failed"),
            }

            if attempt < MAX_ATTEMPTS {
                sleep(RETRY_INTERVAL).await;
            }

            match self.order_service.get_positions().await {
                Ok(positions) if !positions.iter().any(|p| p.symbol == symbol) => break,
                _ => {}
            }
        }

        attempt
    }
}

#[async_trait]
impl JobHandler for AssignmentMonitor {
    fn id(&self) -> &str {
        "assignment-monitor"
    }

    fn name(&self) -> &str {
        "Assignment Monitor"
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        if !self.calendar.is_market_open(now) {
            return JobResult::skipped("not a trading day");
        }
        let today = crate::position_monitor::et_naive_date(self.calendar.as_ref(), now);

        let candidates = match self.candidate_trades(today).await {
            Ok(trades) => trades,
            Err(err) => return JobResult::failed(err.to_string(), None),
        };
        if candidates.is_empty() {
            return JobResult::skipped("no recently expired trades to check");
        }

        let mut detected = 0u32;
        let mut last_error = None;
        for trade in &candidates {
            match self.detect_and_liquidate(trade).await {
                Ok(Some(assignment)) => {
                    detected += 1;
                    let mut updated = trade.clone();
                    updated.assignment = Some(assignment);
                    updated.status = model::paper_trade::PaperTradeStatus::Exercised;
                    if let Err(err) = self.order_service.update_paper_trade(&updated).await {
                        warn!(trade_id = %trade.id, error = %err, "assignment monitor: failed to persist assignment");
                        last_error = Some(err.to_string());
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(trade_id = %trade.id, error = %err, "assignment monitor: detection failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        if let Some(err) = last_error {
            return JobResult::failed(err, None);
        }
        if detected == 0 {
            return JobResult::skipped("no assignments detected");
        }
        let mut result = JobResult::success();
        result.data = Some(serde_json::json!({"assignmentsDetected": detected}));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_grows_per_attempt() {
        let policy = DefaultAssignmentPricing;
        assert_eq!(policy.reduction_fraction(1, dec!(0.001)), dec!(0.001));
        assert_eq!(policy.reduction_fraction(2, dec!(0.001)), dec!(0.002));
    }

    #[test]
    fn wide_spread_doubles_the_reduction() {
        let policy = DefaultAssignmentPricing;
        assert_eq!(policy.reduction_fraction(1, dec!(0.01)), dec!(0.002));
    }
}
