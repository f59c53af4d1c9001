//! Account NAV reads (`spec.md` §4.5 "NAV Snapshot": "read NAV
//! (`portfolioValue`, else `netLiquidation`)").

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use rust_decimal::Decimal;
use serde_json::Value;

/// Fetch the account's current net asset value, preferring
/// `portfolioValue` and falling back to `netLiquidation`.
pub async fn get_account_nav(client: &AuthenticatedClient, acct_id: &str) -> Result<Option<Decimal>, OrdersError> {
    let response = client
        .request(reqwest::Method::GET, &format!("/portfolio/{acct_id}/summary"))
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let body: Value = response.json().await.unwrap_or(Value::Null);

    Ok(nav_field(&body, "portfolioValue").or_else(|| nav_field(&body, "netLiquidation")))
}

fn nav_field(body: &Value, key: &str) -> Option<Decimal> {
    let amount = body.get(key)?.get("amount")?;
    amount
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| amount.as_f64().and_then(Decimal::from_f64_retain))
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
    async fn prefers_portfolio_value() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/portfolio/U123/summary");
            then.status(200).json_body(serde_json::json!({
                "portfolioValue": {"amount": "125000.50"},
                "netLiquidation": {"amount": "124000.00"}
            }));
        });
        let nav = get_account_nav(&client(server.base_url()), "U123").await.unwrap();
        assert_eq!(nav, Some(dec!(125000.50)));
    }

    #[tokio::test]
    async fn falls_back_to_net_liquidation() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/portfolio/U123/summary");
            then.status(200).json_body(serde_json::json!({
                "netLiquidation": {"amount": "124000.00"}
            }));
        });
        let nav = get_account_nav(&client(server.base_url()), "U123").await.unwrap();
        assert_eq!(nav, Some(dec!(124000.00)));
    }

    #[tokio::test]
    async fn missing_both_fields_yields_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/portfolio/U123/summary");
            then.status(200).json_body(serde_json::json!({}));
        });
        let nav = get_account_nav(&client(server.base_url()), "U123").await.unwrap();
        assert_eq!(nav, None);
    }
}
