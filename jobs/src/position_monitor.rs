//! Position Monitor (`spec.md` §4.5): every 5 minutes, 9:00-16:00 ET,
//! defends open trades with the single operative layer this core owns —
//! a 15-minute sustained underlying breach. The native bracket stop
//! (Layer 2) and the 0DTE closer (Layer 3) are independent safety nets.

use crate::breach_tracker::BreachTracker;
use crate::monitor_session::MonitorSession;
use async_trait::async_trait;
use chrono::Utc;
use model::calendar::MarketCalendar;
use model::occ::OccSymbol;
use model::order::OrderSide;
use model::paper_trade::PaperTrade;
use model::persistence::PaperTradeRead;
use model::JobResult;
use orders::OrderService;
use rust_decimal::prelude::ToPrimitive;
use scheduler::JobHandler;
use std::sync::Arc;
use tracing::{error, warn};

/// Reads and closes short-strangle/strangle-like legs for one user's open
/// trades, against a sustained underlying breach.
pub struct PositionMonitor {
    user_id: String,
    calendar: Arc<dyn MarketCalendar>,
    paper_trades: Arc<dyn PaperTradeRead>,
    order_service: Arc<OrderService>,
    breach_tracker: Arc<BreachTracker>,
    session: Arc<MonitorSession>,
}

impl PositionMonitor {
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
            breach_tracker: Arc::new(BreachTracker::new()),
            session: Arc::new(MonitorSession::new()),
        }
    }

    async fn check_trade(&self, trade: &PaperTrade, now: chrono::DateTime<Utc>) -> anyhow::Result<bool> {
        let (Some(put), Some(call)) = (&trade.put_leg, &trade.call_leg) else {
            return Ok(false);
        };

        let spot = self.order_service.get_spot_price(&trade.symbol).await?;
        let Some(spot) = spot else {
            return Ok(false);
        };

        let breached = spot < put.strike || spot > call.strike;
        if !breached {
            self.breach_tracker.clear(trade.id);
            return Ok(false);
        }

        if !self.breach_tracker.record_breach(trade.id, now) {
            return Ok(false);
        }

        self.close_trade(trade).await?;
        Ok(true)
    }

    async fn close_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        let positions = self.order_service.get_positions().await?;
        let mut closed_any = false;

        for leg in trade.legs() {
            let Some(conid) = leg.conid else { continue };
            let leg_symbol = OccSymbol {
                underlying: trade.symbol.clone(),
                expiration: trade.expiration,
                right: leg.right,
                strike: leg.strike,
            };
            let Some(position) = positions.iter().find(|p| orders::position_matches_leg(p, &leg_symbol)) else {
                continue;
            };
            let quantity = position.position.abs().trunc().to_i64().and_then(|q| u32::try_from(q).ok()).unwrap_or(0);
            if quantity == 0 {
                continue;
            }
            let side = if position.position.is_sign_negative() { OrderSide::Buy } else { OrderSide::Sell };
            self.order_service
                .place_close_order_by_conid(conid, &trade.symbol, side, quantity, model::order::OrderType::Market, None)
                .await?;
            closed_any = true;
        }

        if closed_any {
            let mut updated = trade.clone();
            updated.status = model::paper_trade::PaperTradeStatus::Closed;
            updated.exit_reason = Some("Layer 1: sustained underlying breach > 15 minutes".to_string());
            updated.closed_at = Some(Utc::now());
            self.order_service.update_paper_trade(&updated).await?;
            self.breach_tracker.clear(trade.id);
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PositionMonitor {
    fn id(&self) -> &str {
        "position-monitor"
    }

    fn name(&self) -> &str {
        "Position Monitor"
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        if !self.calendar.is_market_open(now) {
            return JobResult::skipped("market closed");
        }
        let et_time = self.calendar.et_time_string(now);
        if et_time.as_str() < "09:00" || et_time.as_str() > "16:00" {
            return JobResult::skipped("outside monitoring hours");
        }

        let et_date = et_naive_date(self.calendar.as_ref(), now);

        let open_trades = match self.paper_trades.list_open_trades(&self.user_id).await {
            Ok(trades) => trades,
            Err(err) => {
                error!(error = %err, "position monitor: failed to load open trades");
                self.session.record_tick(et_date, 0, false, Some(err.to_string()));
                return JobResult::failed(err.to_string(), None);
            }
        };

        let mut alert_triggered = false;
        let mut last_error = None;
        for trade in &open_trades {
            match self.check_trade(trade, now).await {
                Ok(true) => alert_triggered = true,
                Ok(false) => {}
                Err(err) => {
                    warn!(trade_id = %trade.id, error = %err, "position monitor: trade check failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        self.session.record_tick(
            et_date,
            u32::try_from(open_trades.len()).unwrap_or(u32::MAX),
            alert_triggered,
            last_error.clone(),
        );

        if let Some(err) = last_error {
            return JobResult::failed(err, None);
        }
        if alert_triggered {
            let mut result = JobResult::success();
            result.data = Some(serde_json::json!({"alertsTriggered": true}));
            return result;
        }
        JobResult::skipped("aggregated")
    }
}

/// Parse a [`MarketCalendar`]'s `YYYY-MM-DD` ET date string back into a
/// [`chrono::NaiveDate`] for [`MonitorSession`]'s rollover key.
pub(crate) fn et_naive_date(calendar: &dyn MarketCalendar, now: chrono::DateTime<Utc>) -> chrono::NaiveDate {
    chrono::NaiveDate::parse_from_str(&calendar.et_date_string(now), "%Y-%m-%d").unwrap_or_else(|_| now.date_naive())
}
