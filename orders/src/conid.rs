//! Conid resolution (`spec.md` §4.3): `resolveConid`/`resolveOptionConid`.

use ibkr_broker::session::AuthenticatedClient;
use model::occ::OptionRight;
use model::InstrumentResolutionError;
use rust_decimal::Decimal;
use serde_json::Value;

/// Tolerance below which a broker-reported strike is considered equal to
/// the requested strike (`spec.md` §4.3).
const STRIKE_TOLERANCE: Decimal = Decimal::new(1, 2); // 0.01

/// `resolveConid(symbol)` — queries the broker's instrument search, trying
/// a plain-symbol query and, on an empty result, a fallback query form.
pub async fn resolve_conid(client: &AuthenticatedClient, symbol: &str) -> Result<i64, InstrumentResolutionError> {
    for query in [symbol.to_string(), format!("{symbol}*")] {
        if let Some(conid) = search_stock(client, &query).await {
            return Ok(conid);
        }
    }
    Err(InstrumentResolutionError { symbol: symbol.to_string() })
}

async fn search_stock(client: &AuthenticatedClient, query: &str) -> Option<i64> {
    let response = client
        .request(reqwest::Method::GET, "/iserver/secdef/search")
        .query(&[("symbol", query)])
        .send()
        .await
        .ok()?;
    let body: Value = response.json().await.ok()?;
    let entries = body.as_array()?;
    entries
        .iter()
        .find(|entry| {
            entry.get("symbol").and_then(Value::as_str).map(str::to_uppercase) == Some(query.trim_end_matches('*').to_uppercase())
        })
        .or_else(|| entries.first())
        .and_then(|entry| entry.get("conid"))
        .and_then(|c| c.as_str().and_then(|s| s.parse().ok()).or_else(|| c.as_i64()))
}

/// `resolveOptionConid(underlying, expiration, right, strike)` — a search
/// call to find the underlying's conid, then a strikes/info call to match
/// the exact contract. A match requires strike tolerance < 0.01 and right
/// letter equality (`spec.md` §4.3).
pub async fn resolve_option_conid(
    client: &AuthenticatedClient,
    underlying: &str,
    expiration: &str,
    right: OptionRight,
    strike: Decimal,
) -> Result<i64, InstrumentResolutionError> {
    let descriptor = format!("{underlying} {expiration} {right} {strike}");
    let underlying_conid = resolve_conid(client, underlying).await?;

    let response = client
        .request(reqwest::Method::GET, "/iserver/secdef/info")
        .query(&[
            ("conid", underlying_conid.to_string()),
            ("sectype", "OPT".to_string()),
            ("month", expiration.to_string()),
            ("right", right.to_string()),
            ("strike", strike.to_string()),
        ])
        .send()
        .await
        .map_err(|_| InstrumentResolutionError { symbol: descriptor.clone() })?;

    let body: Value = response
        .json()
        .await
        .map_err(|_| InstrumentResolutionError { symbol: descriptor.clone() })?;
    let entries = body.as_array().cloned().unwrap_or_default();

    entries
        .iter()
        .find_map(|entry| {
            let entry_right = entry.get("right").and_then(Value::as_str)?;
            let entry_strike: Decimal = entry.get("strike").and_then(Value::as_str).and_then(|s| s.parse().ok())?;
            let right_matches = match right {
                OptionRight::Call => entry_right.eq_ignore_ascii_case("C") || entry_right.eq_ignore_ascii_case("CALL"),
                OptionRight::Put => entry_right.eq_ignore_ascii_case("P") || entry_right.eq_ignore_ascii_case("PUT"),
            };
            if !right_matches || (entry_strike - strike).abs() >= STRIKE_TOLERANCE {
                return None;
            }
            entry.get("conid").and_then(|c| c.as_str().and_then(|s| s.parse().ok()).or_else(|| c.as_i64()))
        })
        .ok_or(InstrumentResolutionError { symbol: descriptor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use ibkr_broker::session::AuthenticatedClient;
    use rust_decimal_macros::dec;

    fn client(base_url: String) -> AuthenticatedClient {
        AuthenticatedClient {
            http: reqwest::Client::new(),
            base_url,
            bearer: None,
        }
    }

    #[tokio::test]
    async fn resolve_conid_returns_first_match() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/iserver/secdef/search");
            then.status(200).json_body(serde_json::json!([
                {"conid": "756733", "symbol": "SPY"}
            ]));
        });
        let conid = resolve_conid(&client(server.base_url()), "SPY").await.unwrap();
        assert_eq!(conid, 756733);
    }

    #[tokio::test]
    async fn resolve_conid_fails_when_no_match() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/iserver/secdef/search");
            then.status(200).json_body(serde_json::json!([]));
        });
        let err = resolve_conid(&client(server.base_url()), "ZZZZ").await.unwrap_err();
        assert_eq!(err.symbol, "ZZZZ");
    }

    #[tokio::test]
    async fn resolve_option_conid_matches_strike_within_tolerance() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/iserver/secdef/search");
            then.status(200).json_body(serde_json::json!([{"conid": "756733", "symbol": "SPY"}]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/iserver/secdef/info");
            then.status(200).json_body(serde_json::json!([
                {"conid": "9999", "right": "C", "strike": "684.00"}
            ]));
        });
        let conid = resolve_option_conid(&client(server.base_url()), "SPY", "20251215", OptionRight::Call, dec!(684))
            .await
            .unwrap();
        assert_eq!(conid, 9999);
    }
}
