//! `orders` table: the Order & Position Service is the sole writer
//! (`spec.md` §5).

use crate::database::Database;
use crate::error::{ConversionError, IntoDomainModel};
use crate::schema::orders;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use model::order::{OrderRecord, OrderSide, OrderStatus, OrderType};
use model::persistence::{OrderLedgerRead, OrderLedgerWrite};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = orders)]
#[diesel(treat_none_as_null = true)]
struct OrderSQLite {
    id: String,
    broker_order_id: Option<String>,
    symbol: String,
    side: String,
    quantity: i32,
    order_type: String,
    limit_price: Option<String>,
    parent_id: Option<String>,
    child_ids: String,
    status: String,
    submitted_at: chrono::NaiveDateTime,
    filled_at: Option<chrono::NaiveDateTime>,
    fill_price: Option<String>,
    paper_trade_id: Option<String>,
}

fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn side_from_str(raw: &str) -> Result<OrderSide, ConversionError> {
    match raw {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(ConversionError::new("side", format!("unknown side {other:?}"))),
    }
}

fn order_type_to_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "market",
        OrderType::Limit => "limit",
        OrderType::Stop => "stop",
    }
}

fn order_type_from_str(raw: &str) -> Result<OrderType, ConversionError> {
    match raw {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        "stop" => Ok(OrderType::Stop),
        other => Err(ConversionError::new("order_type", format!("unknown order type {other:?}"))),
    }
}

fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Submitted => "submitted",
        OrderStatus::Filled => "filled",
        OrderStatus::Partial => "partial",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Rejected => "rejected",
    }
}

fn status_from_str(raw: &str) -> Result<OrderStatus, ConversionError> {
    match raw {
        "submitted" => Ok(OrderStatus::Submitted),
        "filled" => Ok(OrderStatus::Filled),
        "partial" => Ok(OrderStatus::Partial),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "rejected" => Ok(OrderStatus::Rejected),
        other => Err(ConversionError::new("status", format!("unknown status {other:?}"))),
    }
}

impl TryFrom<&OrderRecord> for OrderSQLite {
    type Error = ConversionError;

    fn try_from(order: &OrderRecord) -> Result<Self, Self::Error> {
        let quantity = i32::try_from(order.quantity)
            .map_err(|_| ConversionError::new("quantity", "quantity exceeds i32 range"))?;
        let child_ids = serde_json::to_string(&order.child_ids)
            .map_err(|e| ConversionError::new("child_ids", e.to_string()))?;
        Ok(Self {
            id: order.id.to_string(),
            broker_order_id: order.broker_order_id.clone(),
            symbol: order.symbol.clone(),
            side: side_to_str(order.side).to_string(),
            quantity,
            order_type: order_type_to_str(order.order_type).to_string(),
            limit_price: order.limit_price.map(|d| d.to_string()),
            parent_id: order.parent_id.map(|id| id.to_string()),
            child_ids,
            status: status_to_str(order.status).to_string(),
            submitted_at: order.submitted_at.naive_utc(),
            filled_at: order.filled_at.map(|t| t.naive_utc()),
            fill_price: order.fill_price.map(|d| d.to_string()),
            paper_trade_id: order.paper_trade_id.map(|id| id.to_string()),
        })
    }
}

impl IntoDomainModel<OrderRecord> for OrderSQLite {
    fn into_domain_model(self) -> Result<OrderRecord, ConversionError> {
        let parse_decimal = |field: &'static str, value: Option<String>| {
            value
                .map(|v| Decimal::from_str(&v).map_err(|_| ConversionError::new(field, "invalid decimal")))
                .transpose()
        };
        let parse_uuid = |field: &'static str, value: Option<String>| {
            value
                .map(|v| Uuid::parse_str(&v).map_err(|_| ConversionError::new(field, "invalid uuid")))
                .transpose()
        };
        Ok(OrderRecord {
            id: Uuid::parse_str(&self.id).map_err(|_| ConversionError::new("id", "invalid uuid"))?,
            broker_order_id: self.broker_order_id,
            symbol: self.symbol,
            side: side_from_str(&self.side)?,
            quantity: u32::try_from(self.quantity).unwrap_or(0),
            order_type: order_type_from_str(&self.order_type)?,
            limit_price: parse_decimal("limit_price", self.limit_price)?,
            parent_id: parse_uuid("parent_id", self.parent_id)?,
            child_ids: serde_json::from_str(&self.child_ids)
                .map_err(|e| ConversionError::new("child_ids", e.to_string()))?,
            status: status_from_str(&self.status)?,
            submitted_at: DateTime::<Utc>::from_naive_utc_and_offset(self.submitted_at, Utc),
            filled_at: self
                .filled_at
                .map(|t| DateTime::<Utc>::from_naive_utc_and_offset(t, Utc)),
            fill_price: parse_decimal("fill_price", self.fill_price)?,
            paper_trade_id: parse_uuid("paper_trade_id", self.paper_trade_id)?,
        })
    }
}

pub(crate) struct WorkerOrder;

impl WorkerOrder {
    fn insert(connection: &mut SqliteConnection, order: &OrderRecord) -> anyhow::Result<()> {
        let row = OrderSQLite::try_from(order)?;
        diesel::insert_into(orders::table)
            .values(&row)
            .execute(connection)?;
        Ok(())
    }

    fn update(connection: &mut SqliteConnection, order: &OrderRecord) -> anyhow::Result<()> {
        let row = OrderSQLite::try_from(order)?;
        diesel::update(orders::table.filter(orders::id.eq(&row.id)))
            .set(&row)
            .execute(connection)?;
        Ok(())
    }

    fn get(connection: &mut SqliteConnection, id: Uuid) -> anyhow::Result<Option<OrderRecord>> {
        let row = orders::table
            .filter(orders::id.eq(id.to_string()))
            .first::<OrderSQLite>(connection)
            .optional()?;
        row.map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .transpose()
    }

    fn list_open(connection: &mut SqliteConnection) -> anyhow::Result<Vec<OrderRecord>> {
        let rows = orders::table
            .filter(orders::status.eq_any(["submitted", "partial"]))
            .load::<OrderSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }
}

#[async_trait]
impl OrderLedgerRead for Database {
    async fn get_order(&self, id: Uuid) -> anyhow::Result<Option<OrderRecord>> {
        self.with_conn(move |conn| WorkerOrder::get(conn, id)).await
    }

    async fn list_open_orders(&self) -> anyhow::Result<Vec<OrderRecord>> {
        self.with_conn(WorkerOrder::list_open).await
    }
}

#[async_trait]
impl OrderLedgerWrite for Database {
    async fn insert_order(&self, order: &OrderRecord) -> anyhow::Result<()> {
        let order = order.clone();
        self.with_conn(move |conn| WorkerOrder::insert(conn, &order)).await
    }

    async fn update_order(&self, order: &OrderRecord) -> anyhow::Result<()> {
        let order = order.clone();
        self.with_conn(move |conn| WorkerOrder::update(conn, &order)).await
    }
}
