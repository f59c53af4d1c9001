//! Order submission protocol (`spec.md` §4.3): place, confirm interstitial
//! replies, and parse whatever shape the order id comes back in.

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use model::order::{is_rejected_order_id_sentinel, OrderSide, OrderType, TimeInForce};
use serde_json::{json, Value};

/// One leg of a submission request (`spec.md` §4.3 step 2 body shape).
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Account id the order posts against.
    pub acct_id: String,
    /// Resolved broker conid.
    pub conid: i64,
    /// Market, limit, or stop.
    pub order_type: OrderType,
    /// Buy or sell.
    pub side: OrderSide,
    /// Day or GTC.
    pub tif: TimeInForce,
    /// Contract/share quantity.
    pub quantity: u32,
    /// Required for `Limit`/`Stop`.
    pub price: Option<rust_decimal::Decimal>,
    /// Trade outside regular trading hours.
    pub outside_rth: bool,
}

impl OrderRequest {
    fn to_json(&self) -> Value {
        let mut order = json!({
            "acctId": self.acct_id,
            "conid": self.conid,
            "orderType": self.order_type.to_string(),
            "side": self.side.to_string(),
            "tif": self.tif.to_string(),
            "quantity": self.quantity,
            "outsideRTH": self.outside_rth,
        });
        if let Some(price) = self.price {
            order["price"] = json!(price.to_string());
        }
        order
    }
}

/// Submit one or more orders, following the full interstitial-confirmation
/// protocol (`spec.md` §4.3 steps 2-4). Returns the parsed broker order id,
/// or `None` when the response carried no parseable id (still a success,
/// per step 5: "logs a warning but still marks success").
pub async fn submit_orders(client: &AuthenticatedClient, requests: &[OrderRequest]) -> Result<Option<String>, OrdersError> {
    let body = json!({ "orders": requests.iter().map(OrderRequest::to_json).collect::<Vec<_>>() });

    let response = client
        .request(reqwest::Method::POST, &format!("/iserver/account/{}/orders", requests[0].acct_id))
        .json(&body)
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(OrdersError::Rejected {
            http_status: status,
            body_snippet: text.chars().take(256).collect(),
        });
    }

    let raw: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let final_body = resolve_interstitial(client, &raw).await?;
    Ok(parse_order_id(&final_body))
}

/// If the broker returned an interstitial confirmation array
/// `[{id, message}]`, POST `/iserver/reply/{id}` with `{confirmed:true}`
/// and return the resulting body; otherwise return `raw` unchanged
/// (`spec.md` §4.3 step 3).
async fn resolve_interstitial(client: &AuthenticatedClient, raw: &Value) -> Result<Value, OrdersError> {
    let Some(array) = raw.as_array() else {
        return Ok(raw.clone());
    };
    let Some(reply_id) = array.first().and_then(|entry| entry.get("id")).and_then(Value::as_str) else {
        return Ok(raw.clone());
    };

    let response = client
        .request(reqwest::Method::POST, &format!("/iserver/reply/{reply_id}"))
        .json(&json!({ "confirmed": true }))
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(OrdersError::Rejected {
            http_status: status,
            body_snippet: text.chars().take(256).collect(),
        });
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Parse an order id from any of the five candidate shapes
/// (`spec.md` §4.3 step 4), trimming and rejecting sentinel values.
pub fn parse_order_id(raw: &Value) -> Option<String> {
    let candidates = [
        raw.get("order_id"),
        raw.as_array().and_then(|a| a.first()).and_then(|e| {
            e.get("order_id").or_else(|| e.get("orderId")).or_else(|| e.get("id")).or_else(|| e.get("conid"))
        }),
        raw.get("orders").and_then(|o| o.as_array()).and_then(|a| a.first()).and_then(extract_any_id),
        raw.get("data").and_then(|o| o.as_array()).and_then(|a| a.first()).and_then(extract_any_id),
        raw.get("reply").and_then(|o| o.as_array()).and_then(|a| a.first()).and_then(extract_any_id),
    ];

    candidates.into_iter().flatten().find_map(|value| {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let trimmed = text.trim().to_string();
        if is_rejected_order_id_sentinel(&trimmed) {
            None
        } else {
            Some(trimmed)
        }
    })
}

fn extract_any_id(entry: &Value) -> Option<&Value> {
    entry
        .get("order_id")
        .or_else(|| entry.get("orderId"))
        .or_else(|| entry.get("id"))
        .or_else(|| entry.get("conid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_id_top_level() {
        let raw = json!({"order_id": "123456"});
        assert_eq!(parse_order_id(&raw), Some("123456".to_string()));
    }

    #[test]
    fn parses_order_id_from_array_shape() {
        let raw = json!([{"orderId": "987"}]);
        assert_eq!(parse_order_id(&raw), Some("987".to_string()));
    }

    #[test]
    fn parses_order_id_from_orders_wrapper() {
        let raw = json!({"orders": [{"id": "555"}]});
        assert_eq!(parse_order_id(&raw), Some("555".to_string()));
    }

    #[test]
    fn rejects_sentinel_values() {
        let raw = json!({"order_id": "undefined"});
        assert_eq!(parse_order_id(&raw), None);
    }

    #[test]
    fn trims_whitespace_before_checking_sentinel() {
        let raw = json!({"order_id": "  "});
        assert_eq!(parse_order_id(&raw), None);
    }

    #[test]
    fn falls_back_through_candidate_order() {
        let raw = json!({"data": [{"conid": 42}]});
        assert_eq!(parse_order_id(&raw), Some("42".to_string()));
    }
}
