//! 0DTE Closer (`spec.md` §4.5): two cron entries share this handler id —
//! the regular 15:55 ET close and the 12:55 ET early-close trigger. The
//! handler itself decides which firing, if either, is the right one.

use async_trait::async_trait;
use chrono::Utc;
use model::calendar::MarketCalendar;
use model::occ::{OccSymbol, OptionRight};
use model::order::{OrderSide, OrderType};
use model::paper_trade::PaperTrade;
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

/// Delta magnitude above which a 0DTE position is closed as risky
/// (`spec.md` §4.5).
const RISKY_DELTA_THRESHOLD: Decimal = dec!(0.30);
/// Fallback delta assumed once a position is classified ITM by spot vs.
/// strike but the broker reports no delta (`spec.md` §4.5).
const ASSUMED_ITM_DELTA: Decimal = dec!(0.50);
/// Minutes the firing may drift from the exit deadline before being
/// considered the wrong cron entry (`spec.md` §4.5 step 1).
const DEADLINE_TOLERANCE_MINUTES: i64 = 10;

/// Closes any 0DTE position whose effective delta exceeds the risk
/// threshold as the exit deadline approaches.
pub struct ZeroDteCloser {
    user_id: String,
    calendar: Arc<dyn MarketCalendar>,
    paper_trades: Arc<dyn PaperTradeRead>,
    order_service: Arc<OrderService>,
}

impl ZeroDteCloser {
    /// Construct a closer bound to one user's trades and order service.
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

    fn minutes_from_deadline(&self, now: chrono::DateTime<Utc>) -> Option<i64> {
        let now_str = self.calendar.et_time_string(now);
        let deadline_str = self.calendar.exit_deadline(now);
        let now_minutes = parse_hhmm(&now_str)?;
        let deadline_minutes = parse_hhmm(&deadline_str)?;
        Some((now_minutes - deadline_minutes).abs())
    }

    async fn close_with_retry(&self, conid: i64, symbol: &str, side: OrderSide, quantity: u32) -> anyhow::Result<()> {
        let mut last_err = None;
        for attempt in 0..3 {
            match self
                .order_service
                .place_close_order_by_conid(conid, symbol, side, quantity, OrderType::Market, None)
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    if attempt < 2 {
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        Err(anyhow::anyhow!(last_err.expect("at least one attempt ran").to_string()))
    }

    async fn close_risky_legs(&self, trade: &PaperTrade, spot_prices: &std::collections::HashMap<String, Decimal>) -> (bool, bool) {
        let positions = match self.order_service.get_positions().await {
            Ok(p) => p,
            Err(err) => {
                warn!(trade_id = %trade.id, error = %err, "0dte closer: failed to fetch positions");
                return (false, true);
            }
        };
        let Some(&spot) = spot_prices.get(&trade.symbol) else {
            return (false, false);
        };

        let mut any_risky = false;
        let mut any_failure = false;
        let mut reasons = Vec::new();

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
            let delta = effective_delta(leg.right, leg.strike, spot, position.delta, leg.delta_at_entry);
            if delta <= RISKY_DELTA_THRESHOLD {
                continue;
            }
            any_risky = true;
            let quantity = position.position.abs().trunc().to_i64().and_then(|q| u32::try_from(q).ok()).unwrap_or(0);
            if quantity == 0 {
                continue;
            }
            let side = if position.position.is_sign_negative() { OrderSide::Buy } else { OrderSide::Sell };
            if self.close_with_retry(conid, &trade.symbol, side, quantity).await.is_err() {
                any_failure = true;
                continue;
            }
            reasons.push(format!("Auto-closed by 0DTE manager: Delta {delta} > {RISKY_DELTA_THRESHOLD} threshold"));
        }

        if !reasons.is_empty() {
            let mut updated = trade.clone();
            updated.exit_reason = Some(reasons.join("; "));
            if !any_failure {
                updated.status = model::paper_trade::PaperTradeStatus::Closed;
                updated.closed_at = Some(Utc::now());
            }
            if let Err(err) = self.order_service.update_paper_trade(&updated).await {
                warn!(trade_id = %trade.id, error = %err, "0dte closer: failed to persist close");
                any_failure = true;
            }
        }

        (any_risky, any_failure)
    }
}

#[async_trait]
impl JobHandler for ZeroDteCloser {
    fn id(&self) -> &str {
        "0dte-closer"
    }

    fn name(&self) -> &str {
        "0DTE Closer"
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        let Some(drift) = self.minutes_from_deadline(now) else {
            return JobResult::skipped("could not compute exit deadline");
        };
        if drift > DEADLINE_TOLERANCE_MINUTES {
            return JobResult::skipped("not within the exit-deadline window for this firing");
        }

        let today = crate::position_monitor::et_naive_date(self.calendar.as_ref(), now);
        let open_trades = match self.paper_trades.list_open_trades_expiring_on(&self.user_id, today).await {
            Ok(trades) => trades,
            Err(err) => return JobResult::failed(err.to_string(), None),
        };
        if open_trades.is_empty() {
            return JobResult::skipped("no 0DTE trades expiring today");
        }

        let mut spot_prices = std::collections::HashMap::new();
        for trade in &open_trades {
            if spot_prices.contains_key(&trade.symbol) {
                continue;
            }
            let mut resolved = None;
            for attempt in 0..3 {
                match self.order_service.get_spot_price(&trade.symbol).await {
                    Ok(Some(price)) => {
                        resolved = Some(price);
                        break;
                    }
                    _ if attempt < 2 => sleep(Duration::from_secs(2)).await,
                    _ => {}
                }
            }
            if let Some(price) = resolved {
                spot_prices.insert(trade.symbol.clone(), price);
            }
        }

        let mut any_risky = false;
        let mut any_failure = false;
        for trade in &open_trades {
            let (risky, failed) = self.close_risky_legs(trade, &spot_prices).await;
            any_risky |= risky;
            any_failure |= failed;
        }

        if !any_risky {
            return JobResult::skipped("no risky positions at the exit deadline");
        }
        if any_failure {
            return JobResult::failed("one or more risky positions could not be closed; manual intervention required", None);
        }
        let mut result = JobResult::success();
        result.data = Some(serde_json::json!({"closedRiskyPositions": true}));
        result
    }
}

fn parse_hhmm(value: &str) -> Option<i64> {
    let (h, m) = value.split_once(':')?;
    Some(h.parse::<i64>().ok()? * 60 + m.parse::<i64>().ok()?)
}

/// Effective |delta| for one leg, preferring the broker-reported value,
/// then ITM classification, then the trade's entry delta (`spec.md` §4.5
/// step 4).
fn effective_delta(
    right: OptionRight,
    strike: Decimal,
    spot: Decimal,
    broker_delta: Option<Decimal>,
    entry_delta: Option<Decimal>,
) -> Decimal {
    if let Some(delta) = broker_delta {
        if !delta.is_zero() {
            return delta.abs();
        }
    }
    let itm = match right {
        OptionRight::Put => spot < strike,
        OptionRight::Call => spot > strike,
    };
    if itm {
        return ASSUMED_ITM_DELTA;
    }
    entry_delta.map(|d| d.abs()).unwrap_or(Decimal::ZERO)
}
