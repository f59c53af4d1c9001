//! Broker execution history (`spec.md` §4.3 realized-P&L computation
//! source; §4.5 Trade Monitor "must tolerate the broker returning only
//! ~7 days of trade history").

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use rust_decimal::Decimal;
use serde_json::Value;

/// One fill reported by `GET /iserver/account/trades`.
#[derive(Debug, Clone)]
pub struct Execution {
    /// OCC-style symbol (options) or plain ticker (stocks) that filled.
    pub symbol: String,
    /// Fill price.
    pub price: Decimal,
    /// Quantity filled.
    pub quantity: u32,
}

/// Fetch the account's recent fills. The broker caps how far back this
/// endpoint looks (`spec.md` §4.5) — callers must not assume full history.
pub async fn get_executions(client: &AuthenticatedClient, acct_id: &str) -> Result<Vec<Execution>, OrdersError> {
    let response = client
        .request(reqwest::Method::GET, "/iserver/account/trades")
        .query(&[("accountId", acct_id)])
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let entries = body.as_array().cloned().unwrap_or_default();

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let symbol = entry
                .get("symbol")
                .or_else(|| entry.get("contractDescription1"))
                .and_then(Value::as_str)?
                .to_string();
            let price = entry
                .get("price")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .or_else(|| entry.get("price").and_then(Value::as_f64).and_then(Decimal::from_f64_retain))?;
            let quantity = entry
                .get("size")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .or_else(|| entry.get("size").and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok()))?;
            Some(Execution { symbol, price, quantity })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;

    fn client(base_url: String) -> AuthenticatedClient {
        AuthenticatedClient {
            http: reqwest::Client::new(),
            base_url,
            bearer: None,
        }
    }

    #[tokio::test]
    async fn parses_trades_array() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/iserver/account/trades");
            then.status(200).json_body(serde_json::json!([
                {"symbol": "SPY   251215C00684000", "price": "1.20", "size": "2"}
            ]));
        });
        let executions = get_executions(&client(server.base_url()), "U123").await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].price, dec!(1.20));
        assert_eq!(executions[0].quantity, 2);
    }
}
