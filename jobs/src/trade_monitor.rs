//! Trade Monitor (`spec.md` §4.5): every 30 minutes during market hours,
//! reconciles each open paper-trade against the broker's reported
//! positions and execution history. Must tolerate the broker returning
//! only ~7 days of trade history — a trade with no matching executions
//! and no matching position is still treated as closed, just with an
//! unexplained exit price of zero.

use async_trait::async_trait;
use chrono::Utc;
use model::calendar::MarketCalendar;
use model::occ::OccSymbol;
use model::paper_trade::{PaperTrade, PaperTradeStatus};
use model::persistence::PaperTradeRead;
use model::JobResult;
use orders::pnl::{compute_realized_pnl, matches_leg, MatchedExecution};
use orders::OrderService;
use scheduler::JobHandler;
use std::sync::Arc;
use tracing::warn;

/// Reconciles open trades against the broker's positions and executions.
pub struct TradeMonitor {
    user_id: String,
    calendar: Arc<dyn MarketCalendar>,
    paper_trades: Arc<dyn PaperTradeRead>,
    order_service: Arc<OrderService>,
}

impl TradeMonitor {
    /// Construct a monitor bound to one user's trades and order service.
    pub fn new(
        user_id: impl Into<String>,
        calendar: Arc<dyn MarketCalendar>,
        paper_trades: Arc<dyn PaperTradeRead>,
        order_service: Arc<OrderService>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            calendar,
            paper_trades,
            order_service,
        }
    }

    async fn reconcile(&self, trade: &PaperTrade, today: chrono::NaiveDate) -> anyhow::Result<bool> {
        if trade.expiration < today {
            let mut updated = trade.clone();
            updated.status = PaperTradeStatus::Expired;
            updated.realized_pnl = Some(trade.entry_premium_total);
            updated.exit_price = Some(rust_decimal::Decimal::ZERO);
            updated.exit_reason = Some("Expired, full premium retained".to_string());
            updated.closed_at = Some(Utc::now());
            self.order_service.update_paper_trade(&updated).await?;
            return Ok(true);
        }

        let positions = self.order_service.get_positions().await?;
        let still_open = trade.legs().any(|leg| {
            let leg_symbol = OccSymbol {
                underlying: trade.symbol.clone(),
                expiration: trade.expiration,
                right: leg.right,
                strike: leg.strike,
            };
            positions.iter().any(|p| orders::position_matches_leg(p, &leg_symbol))
        });
        if still_open {
            return Ok(false);
        }

        let executions = self.order_service.get_executions().await?;
        let mut matched: Vec<MatchedExecution> = Vec::new();
        for leg in trade.legs() {
            let leg_symbol = OccSymbol {
                underlying: trade.symbol.clone(),
                expiration: trade.expiration,
                right: leg.right,
                strike: leg.strike,
            };
            matched.extend(matches_leg(executions.iter().map(|e| (e.symbol.as_str(), e.price, e.quantity)), &leg_symbol));
        }
        let outcome = compute_realized_pnl(&matched, trade.entry_premium_total, false);

        let mut updated = trade.clone();
        updated.status = PaperTradeStatus::Closed;
        updated.realized_pnl = Some(outcome.realized_pnl);
        updated.exit_price = Some(outcome.avg_exit_price);
        updated.exit_reason = Some(outcome.exit_reason);
        updated.closed_at = Some(Utc::now());
        self.order_service.update_paper_trade(&updated).await?;
        Ok(true)
    }
}

#[async_trait]
impl JobHandler for TradeMonitor {
    fn id(&self) -> &str {
        "trade-monitor"
    }

    fn name(&self) -> &str {
        "Trade Monitor"
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        if !self.calendar.is_market_open(now) {
            return JobResult::skipped("market closed");
        }
        let today = crate::position_monitor::et_naive_date(self.calendar.as_ref(), now);

        let open_trades = match self.paper_trades.list_open_trades(&self.user_id).await {
            Ok(trades) => trades,
            Err(err) => return JobResult::failed(err.to_string(), None),
        };

        let mut reconciled = 0u32;
        let mut last_error = None;
        for trade in &open_trades {
            match self.reconcile(trade, today).await {
                Ok(true) => reconciled += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(trade_id = %trade.id, error = %err, "trade monitor: reconciliation failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        if let Some(err) = last_error {
            return JobResult::failed(err, None);
        }
        if reconciled == 0 {
            return JobResult::skipped("aggregated");
        }
        let mut result = JobResult::success();
        result.data = Some(serde_json::json!({"reconciled": reconciled}));
        result
    }
}
