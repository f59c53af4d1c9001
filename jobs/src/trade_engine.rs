//! Trade Engine (`spec.md` §4.5 "daily entry"): once per weekday at
//! 11:00 ET, consults an external [`StrategyEngine`] and, when it signals
//! a new entry, submits both legs with bracket stops and persists the
//! resulting `paper_trade`.

use crate::strategy::{ProposedLeg, StrategyEngine};
use async_trait::async_trait;
use chrono::Utc;
use model::calendar::MarketCalendar;
use model::order::OrderSide;
use model::paper_trade::{Bias, PaperTrade, PaperTradeLeg, PaperTradeStatus};
use model::persistence::PaperTradeRead;
use model::JobResult;
use orders::service::StopConfig;
use orders::OrderService;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scheduler::JobHandler;
use std::sync::Arc;
use uuid::Uuid;

/// Bracket stop multiple applied to every new entry (`spec.md` §4.5:
/// "a bracket stop at 6x premium").
const ENTRY_STOP_MULTIPLE: Decimal = dec!(6);
/// Shares per option contract.
const CONTRACT_MULTIPLIER: Decimal = dec!(100);
/// OCC strike scaling factor (`spec.md` §6: "strike*1000").
const OCC_STRIKE_SCALE: Decimal = dec!(1000);

/// Drives the daily entry decision for one symbol, one user.
pub struct TradeEngine {
    user_id: String,
    symbol: String,
    calendar: Arc<dyn MarketCalendar>,
    paper_trades: Arc<dyn PaperTradeRead>,
    order_service: Arc<OrderService>,
    strategy_engine: Arc<dyn StrategyEngine>,
}

impl TradeEngine {
    /// Construct a trade engine for one symbol under one user's account.
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        calendar: Arc<dyn MarketCalendar>,
        paper_trades: Arc<dyn PaperTradeRead>,
        order_service: Arc<OrderService>,
        strategy_engine: Arc<dyn StrategyEngine>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            symbol: symbol.into(),
            calendar,
            paper_trades,
            order_service,
            strategy_engine,
        }
    }

    async fn enter_leg(&self, leg: &ProposedLeg, expiration: &str, contracts: u32) -> anyhow::Result<PaperTradeLeg> {
        let occ_symbol = occ_symbol_string(&self.symbol, expiration, leg.right, leg.strike);
        self.order_service
            .place_option_order_with_stop(
                &self.symbol,
                &occ_symbol,
                expiration,
                leg.right,
                leg.strike,
                OrderSide::Sell,
                contracts,
                leg.expected_premium,
                StopConfig { premium_multiple: ENTRY_STOP_MULTIPLE },
            )
            .await?;
        Ok(PaperTradeLeg {
            strike: leg.strike,
            right: leg.right,
            premium: leg.expected_premium,
            conid: None,
            delta_at_entry: None,
        })
    }
}

#[async_trait]
impl JobHandler for TradeEngine {
    fn id(&self) -> &str {
        "trade-engine"
    }

    fn name(&self) -> &str {
        "Trade Engine"
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        if !self.calendar.is_market_open(now) {
            return JobResult::skipped("market closed");
        }
        let today = crate::position_monitor::et_naive_date(self.calendar.as_ref(), now);

        match self.paper_trades.has_trade_on_date(&self.user_id, &self.symbol, today).await {
            Ok(true) => return JobResult::skipped("already entered a trade today"),
            Ok(false) => {}
            Err(err) => return JobResult::failed(err.to_string(), None),
        }

        let decision = match self.strategy_engine.decide(&self.symbol, now).await {
            Ok(decision) => decision,
            Err(err) => return JobResult::failed(err.to_string(), None),
        };
        if !decision.can_trade {
            return JobResult::skipped("strategy engine declined to trade");
        }

        let expiration_str = decision.expiration.format("%Y%m%d").to_string();
        let mut put_leg = None;
        let mut call_leg = None;
        let mut entry_premium_total = Decimal::ZERO;

        if let Some(put) = &decision.put_leg {
            match self.enter_leg(put, &expiration_str, decision.contracts).await {
                Ok(leg) => {
                    entry_premium_total += leg.premium * Decimal::from(decision.contracts) * CONTRACT_MULTIPLIER;
                    put_leg = Some(leg);
                }
                Err(err) => return JobResult::failed(err.to_string(), None),
            }
        }
        if let Some(call) = &decision.call_leg {
            match self.enter_leg(call, &expiration_str, decision.contracts).await {
                Ok(leg) => {
                    entry_premium_total += leg.premium * Decimal::from(decision.contracts) * CONTRACT_MULTIPLIER;
                    call_leg = Some(leg);
                }
                Err(err) => return JobResult::failed(err.to_string(), None),
            }
        }

        if put_leg.is_none() && call_leg.is_none() {
            return JobResult::failed("strategy engine returned canTrade=true with no legs", None);
        }

        let trade = PaperTrade {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            strategy: decision.strategy.clone(),
            bias: Bias::Short,
            contracts: decision.contracts,
            put_leg,
            call_leg,
            entry_premium_total,
            expiration: decision.expiration,
            status: PaperTradeStatus::Open,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            assignment: None,
            created_at: now,
            closed_at: None,
            source: "trade-engine".to_string(),
        };

        if let Err(err) = self.order_service.insert_paper_trade(&trade).await {
            return JobResult::failed(err.to_string(), None);
        }

        let mut result = JobResult::success();
        result.data = Some(serde_json::json!({"strategy": decision.strategy, "contracts": decision.contracts}));
        result
    }
}

/// Build the `<UND>[pad]YYMMDD[C|P]<strike*1000 zero-padded to 8>` OCC
/// symbol for a proposed leg (`spec.md` §6). Used for order-submission
/// labeling, never for parsing.
fn occ_symbol_string(underlying: &str, expiration_yyyymmdd: &str, right: model::occ::OptionRight, strike: Decimal) -> String {
    let yymmdd = expiration_yyyymmdd.get(2..).unwrap_or(expiration_yyyymmdd);
    let right_char = match right {
        model::occ::OptionRight::Put => 'P',
        model::occ::OptionRight::Call => 'C',
    };
    let scaled = (strike * OCC_STRIKE_SCALE).round().to_string().replace(['.', '-'], "");
    format!("{underlying:<6}{yymmdd}{right_char}{scaled:0>8}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_occ_symbol_from_parts() {
        let symbol = occ_symbol_string("SPY", "20251215", model::occ::OptionRight::Call, dec!(684));
        assert_eq!(symbol, "SPY   251215C00684000");
    }
}
