//! Placeholder [`StrategyEngine`](jobs::StrategyEngine): the strategy
//! engine is an external collaborator this core deliberately does not
//! implement (`spec.md` §1 Non-goals). This stub always declines to
//! trade, so the Trade Engine job has something to consult until a real
//! engine is wired in at this seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobs::{StrategyEngine, TradingDecision};

/// Always-decline strategy engine.
#[derive(Debug, Default)]
pub struct NullStrategyEngine;

#[async_trait]
impl StrategyEngine for NullStrategyEngine {
    async fn decide(&self, _symbol: &str, _now: DateTime<Utc>) -> anyhow::Result<TradingDecision> {
        Ok(TradingDecision {
            can_trade: false,
            strategy: "none".to_string(),
            contracts: 0,
            expiration: Utc::now().date_naive(),
            put_leg: None,
            call_leg: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_recommends_a_trade() {
        let engine = NullStrategyEngine;
        let decision = engine.decide("SPY", Utc::now()).await.expect("stub never errors");
        assert!(!decision.can_trade);
        assert_eq!(decision.contracts, 0);
        assert!(decision.put_leg.is_none());
        assert!(decision.call_leg.is_none());
    }
}
