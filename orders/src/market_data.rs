//! REST spot-price snapshots (`spec.md` §6 `GET /iserver/marketdata/snapshot`),
//! used by safety jobs that need a one-shot spot price rather than a live
//! WS subscription (`spec.md` §4.5 0DTE Closer: "resolve spot prices for
//! each underlying").

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use rust_decimal::Decimal;
use serde_json::Value;

/// Fetch the last-trade price (field `31`) for a single conid.
pub async fn get_snapshot_price(client: &AuthenticatedClient, conid: i64) -> Result<Option<Decimal>, OrdersError> {
    Ok(get_snapshot_quote(client, conid).await?.and_then(|quote| quote.last))
}

/// Last/bid/ask from one `/iserver/marketdata/snapshot` entry (fields
/// `31`/`84`/`86`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Quote {
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Current bid.
    pub bid: Option<Decimal>,
    /// Current ask.
    pub ask: Option<Decimal>,
}

/// Fetch last/bid/ask for a single conid, used by the Assignment Monitor's
/// limit-price reduction schedule (`spec.md` §4.5).
pub async fn get_snapshot_quote(client: &AuthenticatedClient, conid: i64) -> Result<Option<Quote>, OrdersError> {
    let response = client
        .request(reqwest::Method::GET, "/iserver/marketdata/snapshot")
        .query(&[("conids", conid.to_string())])
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let entries = body.as_array().cloned().unwrap_or_default();

    Ok(entries.first().map(|entry| Quote {
        last: decimal_field(entry, "31"),
        bid: decimal_field(entry, "84"),
        ask: decimal_field(entry, "86"),
    }))
}

fn decimal_field(entry: &Value, key: &str) -> Option<Decimal> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .or_else(|| entry.get(key).and_then(Value::as_f64).and_then(Decimal::from_f64_retain))
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
    async fn parses_last_trade_field() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/iserver/marketdata/snapshot");
            then.status(200).json_body(serde_json::json!([{"conid": 756733, "31": "600.50"}]));
        });
        let price = get_snapshot_price(&client(server.base_url()), 756733).await.unwrap();
        assert_eq!(price, Some(dec!(600.50)));
    }

    #[tokio::test]
    async fn missing_field_yields_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/iserver/marketdata/snapshot");
            then.status(200).json_body(serde_json::json!([{"conid": 1}]));
        });
        let price = get_snapshot_price(&client(server.base_url()), 1).await.unwrap();
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn parses_bid_and_ask() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/iserver/marketdata/snapshot");
            then.status(200).json_body(serde_json::json!([{"conid": 756733, "31": "600.50", "84": "600.49", "86": "600.51"}]));
        });
        let quote = get_snapshot_quote(&client(server.base_url()), 756733).await.unwrap().unwrap();
        assert_eq!(quote.bid, Some(dec!(600.49)));
        assert_eq!(quote.ask, Some(dec!(600.51)));
    }
}
