//! Realized P&L computation for a closed short-option position
//! (`spec.md` §4.3).

use model::occ::OccSymbol;
use rust_decimal::Decimal;

/// One matched broker execution against a leg being closed.
#[derive(Debug, Clone)]
pub struct MatchedExecution {
    /// Fill price for this execution.
    pub fill_price: Decimal,
    /// Quantity filled (contracts).
    pub quantity: u32,
}

/// The outcome of closing one option leg.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedPnl {
    /// Realized profit (positive) or loss (negative).
    pub realized_pnl: Decimal,
    /// Volume-weighted average exit price.
    pub avg_exit_price: Decimal,
    /// Human-readable reason recorded on the trade.
    pub exit_reason: String,
}

/// Identify broker executions matching `leg` by underlying prefix and by
/// the embedded OCC strike tail (`spec.md` §4.3).
pub fn matches_leg<'a>(executions: impl Iterator<Item = (&'a str, Decimal, u32)>, leg_symbol: &OccSymbol) -> Vec<MatchedExecution> {
    let strike_tail = leg_symbol.strike_tail();
    executions
        .filter(|(symbol, _, _)| symbol.starts_with(leg_symbol.underlying.as_str()) && symbol.ends_with(strike_tail.as_str()))
        .map(|(_, price, qty)| MatchedExecution { fill_price: price, quantity: qty })
        .collect()
}

/// Compute realized P&L for a closed short-option leg
/// (`spec.md` §4.3: `totalExitCost = Σ fillPrice·qty·100`,
/// `avgExitPrice = totalExitCost / (Σqty·100)`,
/// `realizedPnl = entryPremiumTotal − totalExitCost`).
///
/// When `matched` is empty and `expired` is true, the option is treated as
/// expired worthless: `realizedPnl = entryPremiumTotal`, exit price zero.
pub fn compute_realized_pnl(matched: &[MatchedExecution], entry_premium_total: Decimal, expired: bool) -> RealizedPnl {
    if matched.is_empty() {
        if expired {
            return RealizedPnl {
                realized_pnl: entry_premium_total,
                avg_exit_price: Decimal::ZERO,
                exit_reason: "Expired worthless".to_string(),
            };
        }
        return RealizedPnl {
            realized_pnl: Decimal::ZERO,
            avg_exit_price: Decimal::ZERO,
            exit_reason: "No matching executions".to_string(),
        };
    }

    let contracts_multiplier = Decimal::from(100);
    let total_exit_cost: Decimal = matched
        .iter()
        .map(|m| m.fill_price * Decimal::from(m.quantity) * contracts_multiplier)
        .sum();
    let total_quantity: Decimal = matched.iter().map(|m| Decimal::from(m.quantity) * contracts_multiplier).sum();
    let avg_exit_price = if total_quantity.is_zero() { Decimal::ZERO } else { total_exit_cost / total_quantity };

    RealizedPnl {
        realized_pnl: entry_premium_total - total_exit_cost,
        avg_exit_price,
        exit_reason: "Closed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use model::occ::OptionRight;
    use rust_decimal_macros::dec;

    #[test]
    fn matches_leg_by_underlying_and_strike_tail() {
        let leg = OccSymbol {
            underlying: "SPY".to_string(),
            expiration: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            right: OptionRight::Call,
            strike: dec!(684.000),
        };
        let executions = vec![
            ("SPY   251215C00684000", dec!(1.20), 2u32),
            ("SPY   251215P00600000", dec!(0.50), 1u32),
        ];
        let matched = matches_leg(executions.iter().map(|(s, p, q)| (*s, *p, *q)), &leg);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].quantity, 2);
    }

    #[test]
    fn expired_worthless_when_no_executions_and_past_expiration() {
        let result = compute_realized_pnl(&[], dec!(240.00), true);
        assert_eq!(result.realized_pnl, dec!(240.00));
        assert_eq!(result.avg_exit_price, Decimal::ZERO);
        assert_eq!(result.exit_reason, "Expired worthless");
    }

    #[test]
    fn closed_position_computes_exit_cost_and_pnl() {
        let matched = vec![MatchedExecution { fill_price: dec!(1.20), quantity: 2 }];
        let result = compute_realized_pnl(&matched, dec!(400.00), false);
        assert_eq!(result.avg_exit_price, dec!(1.20));
        assert_eq!(result.realized_pnl, dec!(400.00) - dec!(240.00));
    }
}
