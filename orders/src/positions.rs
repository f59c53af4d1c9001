//! Broker position reconciliation (`spec.md` §4.3 "reconciliation against
//! broker-reported positions").

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use rust_decimal::Decimal;
use serde_json::Value;

/// One broker-reported position (`GET /portfolio/{acctId}/positions/0`).
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    /// Broker conid.
    pub conid: i64,
    /// OCC-style symbol for options, plain ticker for stocks.
    pub symbol: String,
    /// Signed position size (negative for a short position).
    pub position: Decimal,
    /// Average cost basis, when reported.
    pub avg_cost: Option<Decimal>,
    /// Broker-reported option delta, when the position carries Greeks
    /// (`spec.md` §4.5 step 4 — preferred over any client-side estimate).
    pub delta: Option<Decimal>,
}

/// Fetch every broker-reported position for `acct_id`.
pub async fn get_positions(client: &AuthenticatedClient, acct_id: &str) -> Result<Vec<BrokerPosition>, OrdersError> {
    let response = client
        .request(reqwest::Method::GET, &format!("/portfolio/{acct_id}/positions/0"))
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let entries = body.as_array().cloned().unwrap_or_default();

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let conid = entry.get("conid").and_then(Value::as_i64)?;
            let symbol = entry
                .get("contractDesc")
                .or_else(|| entry.get("ticker"))
                .and_then(Value::as_str)?
                .to_string();
            let position = entry
                .get("position")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .or_else(|| entry.get("position").and_then(Value::as_f64).and_then(Decimal::from_f64_retain))?;
            let avg_cost = entry
                .get("avgCost")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .or_else(|| entry.get("avgCost").and_then(Value::as_f64).and_then(Decimal::from_f64_retain));
            let delta = entry
                .get("delta")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .or_else(|| entry.get("delta").and_then(Value::as_f64).and_then(Decimal::from_f64_retain));
            Some(BrokerPosition { conid, symbol, position, avg_cost, delta })
        })
        .collect())
}

/// True when a broker position's OCC strike tail matches `leg`'s.
pub fn position_matches_leg(position: &BrokerPosition, leg: &model::occ::OccSymbol) -> bool {
    let tail = leg.strike_tail();
    position.symbol.starts_with(leg.underlying.as_str()) && position.symbol.ends_with(tail.as_str())
}
