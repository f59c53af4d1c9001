//! Cancel-all protocol (`spec.md` §4.3): broker-first, local-ledger
//! fallback, and a tolerant "already gone" classification.

use crate::OrdersError;
use ibkr_broker::session::AuthenticatedClient;
use model::order::OrderRecord;
use model::persistence::OrderLedgerWrite;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay between successive cancel calls (`spec.md` §4.3).
const CANCEL_DELAY: Duration = Duration::from_millis(500);

/// `getOpenOrders()` — the broker's live open-order list.
pub async fn get_open_orders(client: &AuthenticatedClient, acct_id: &str) -> Result<Vec<Value>, OrdersError> {
    let response = client
        .request(reqwest::Method::GET, &format!("/iserver/account/{acct_id}/orders"))
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    let body: Value = response.json().await.unwrap_or(Value::Null);
    Ok(body.get("orders").and_then(Value::as_array).cloned().unwrap_or_default())
}

/// `cancelOrder(id)` — cancel a single broker order.
pub async fn cancel_order(client: &AuthenticatedClient, acct_id: &str, broker_order_id: &str) -> Result<(), OrdersError> {
    let response = client
        .request(reqwest::Method::DELETE, &format!("/iserver/account/{acct_id}/order/{broker_order_id}"))
        .send()
        .await
        .map_err(|e| OrdersError::Transport(e.to_string()))?;
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    if message_implies_already_gone(&text) {
        return Ok(());
    }
    Err(OrdersError::Rejected {
        http_status: status,
        body_snippet: text.chars().take(256).collect(),
    })
}

fn message_implies_already_gone(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("cancelled") || lower.contains("filled")
}

/// `cancelAllOrders()` — fetch open orders from the broker; if empty, fall
/// back to the local ledger filtered by status and numeric broker id.
/// Local-only records (no numeric broker id) are never sent as a cancel
/// target but are still marked cancelled directly in the ledger, since the
/// broker has no record of them to begin with. Any cancel failure
/// classified as "already gone" still marks the local record cancelled. A
/// 500 ms delay separates successive cancels (`spec.md` §4.3).
pub async fn cancel_all_orders(
    client: &AuthenticatedClient,
    acct_id: &str,
    ledger: &Arc<dyn OrderLedgerWrite>,
    local_open_orders: Vec<OrderRecord>,
) -> Result<usize, OrdersError> {
    let broker_orders = get_open_orders(client, acct_id).await?;

    let mut cleared = 0usize;

    let targets: Vec<String> = if !broker_orders.is_empty() {
        broker_orders
            .iter()
            .filter_map(|o| o.get("orderId").and_then(Value::as_str).map(str::to_string))
            .collect()
    } else {
        for mut order in local_open_orders.iter().filter(|o| !o.has_numeric_broker_id()).cloned() {
            order.status = model::order::OrderStatus::Cancelled;
            ledger.update_order(&order).await?;
            cleared += 1;
        }
        local_open_orders
            .iter()
            .filter(|o| o.has_numeric_broker_id())
            .filter_map(|o| o.broker_order_id.clone())
            .collect()
    };

    for (index, broker_order_id) in targets.iter().enumerate() {
        if index > 0 {
            sleep(CANCEL_DELAY).await;
        }
        cancel_order(client, acct_id, broker_order_id).await?;
        if let Some(mut order) = local_open_orders.iter().find(|o| o.broker_order_id.as_deref() == Some(broker_order_id.as_str())).cloned() {
            order.status = model::order::OrderStatus::Cancelled;
            ledger.update_order(&order).await?;
        }
        cleared += 1;
    }
    Ok(cleared)
}
