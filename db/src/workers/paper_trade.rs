//! `paper_trades` table: the Order & Position Service is the sole writer
//! (`spec.md` §5).

use crate::database::Database;
use crate::error::{ConversionError, IntoDomainModel};
use crate::schema::paper_trades;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use model::paper_trade::{AssignmentDetails, Bias, PaperTrade, PaperTradeLeg, PaperTradeStatus};
use model::persistence::{PaperTradeRead, PaperTradeWrite};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = paper_trades)]
#[diesel(treat_none_as_null = true)]
struct PaperTradeSQLite {
    id: String,
    user_id: String,
    symbol: String,
    strategy: String,
    bias: String,
    contracts: i32,
    put_leg: Option<String>,
    call_leg: Option<String>,
    entry_premium_total: String,
    expiration: NaiveDate,
    status: String,
    exit_price: Option<String>,
    exit_reason: Option<String>,
    realized_pnl: Option<String>,
    assignment: Option<String>,
    created_at: chrono::NaiveDateTime,
    closed_at: Option<chrono::NaiveDateTime>,
    source: String,
}

fn bias_to_str(bias: Bias) -> &'static str {
    match bias {
        Bias::Short => "short",
        Bias::Long => "long",
        Bias::Neutral => "neutral",
    }
}

fn bias_from_str(raw: &str) -> Result<Bias, ConversionError> {
    match raw {
        "short" => Ok(Bias::Short),
        "long" => Ok(Bias::Long),
        "neutral" => Ok(Bias::Neutral),
        other => Err(ConversionError::new("bias", format!("unknown bias {other:?}"))),
    }
}

fn status_to_str(status: PaperTradeStatus) -> &'static str {
    match status {
        PaperTradeStatus::Open => "open",
        PaperTradeStatus::Closed => "closed",
        PaperTradeStatus::Expired => "expired",
        PaperTradeStatus::Exercised => "exercised",
    }
}

fn status_from_str(raw: &str) -> Result<PaperTradeStatus, ConversionError> {
    match raw {
        "open" => Ok(PaperTradeStatus::Open),
        "closed" => Ok(PaperTradeStatus::Closed),
        "expired" => Ok(PaperTradeStatus::Expired),
        "exercised" => Ok(PaperTradeStatus::Exercised),
        other => Err(ConversionError::new("status", format!("unknown status {other:?}"))),
    }
}

fn leg_to_json(leg: &Option<PaperTradeLeg>) -> Result<Option<String>, ConversionError> {
    leg.as_ref()
        .map(|l| serde_json::to_string(l).map_err(|e| ConversionError::new("leg", e.to_string())))
        .transpose()
}

fn leg_from_json(raw: Option<String>) -> Result<Option<PaperTradeLeg>, ConversionError> {
    raw.map(|v| serde_json::from_str(&v).map_err(|e| ConversionError::new("leg", e.to_string())))
        .transpose()
}

impl TryFrom<&PaperTrade> for PaperTradeSQLite {
    type Error = ConversionError;

    fn try_from(trade: &PaperTrade) -> Result<Self, Self::Error> {
        let contracts = i32::try_from(trade.contracts)
            .map_err(|_| ConversionError::new("contracts", "contracts exceeds i32 range"))?;
        let assignment = trade
            .assignment
            .as_ref()
            .map(|a| serde_json::to_string(a).map_err(|e| ConversionError::new("assignment", e.to_string())))
            .transpose()?;
        Ok(Self {
            id: trade.id.to_string(),
            user_id: trade.user_id.clone(),
            symbol: trade.symbol.clone(),
            strategy: trade.strategy.clone(),
            bias: bias_to_str(trade.bias).to_string(),
            contracts,
            put_leg: leg_to_json(&trade.put_leg)?,
            call_leg: leg_to_json(&trade.call_leg)?,
            entry_premium_total: trade.entry_premium_total.to_string(),
            expiration: trade.expiration,
            status: status_to_str(trade.status).to_string(),
            exit_price: trade.exit_price.map(|d| d.to_string()),
            exit_reason: trade.exit_reason.clone(),
            realized_pnl: trade.realized_pnl.map(|d| d.to_string()),
            assignment,
            created_at: trade.created_at.naive_utc(),
            closed_at: trade.closed_at.map(|t| t.naive_utc()),
            source: trade.source.clone(),
        })
    }
}

impl IntoDomainModel<PaperTrade> for PaperTradeSQLite {
    fn into_domain_model(self) -> Result<PaperTrade, ConversionError> {
        let parse_decimal = |field: &'static str, value: Option<String>| {
            value
                .map(|v| Decimal::from_str(&v).map_err(|_| ConversionError::new(field, "invalid decimal")))
                .transpose()
        };
        let assignment: Option<AssignmentDetails> = self
            .assignment
            .map(|v| {
                serde_json::from_str(&v).map_err(|e| ConversionError::new("assignment", e.to_string()))
            })
            .transpose()?;
        Ok(PaperTrade {
            id: Uuid::parse_str(&self.id).map_err(|_| ConversionError::new("id", "invalid uuid"))?,
            user_id: self.user_id,
            symbol: self.symbol,
            strategy: self.strategy,
            bias: bias_from_str(&self.bias)?,
            contracts: u32::try_from(self.contracts).unwrap_or(0),
            put_leg: leg_from_json(self.put_leg)?,
            call_leg: leg_from_json(self.call_leg)?,
            entry_premium_total: Decimal::from_str(&self.entry_premium_total)
                .map_err(|_| ConversionError::new("entry_premium_total", "invalid decimal"))?,
            expiration: self.expiration,
            status: status_from_str(&self.status)?,
            exit_price: parse_decimal("exit_price", self.exit_price)?,
            exit_reason: self.exit_reason,
            realized_pnl: parse_decimal("realized_pnl", self.realized_pnl)?,
            assignment,
            created_at: DateTime::<Utc>::from_naive_utc_and_offset(self.created_at, Utc),
            closed_at: self
                .closed_at
                .map(|t| DateTime::<Utc>::from_naive_utc_and_offset(t, Utc)),
            source: self.source,
        })
    }
}

pub(crate) struct WorkerPaperTrade;

impl WorkerPaperTrade {
    fn insert(connection: &mut SqliteConnection, trade: &PaperTrade) -> anyhow::Result<()> {
        let row = PaperTradeSQLite::try_from(trade)?;
        diesel::insert_into(paper_trades::table)
            .values(&row)
            .execute(connection)?;
        Ok(())
    }

    fn update(connection: &mut SqliteConnection, trade: &PaperTrade) -> anyhow::Result<()> {
        let row = PaperTradeSQLite::try_from(trade)?;
        diesel::update(paper_trades::table.filter(paper_trades::id.eq(&row.id)))
            .set(&row)
            .execute(connection)?;
        Ok(())
    }

    fn get(connection: &mut SqliteConnection, id: Uuid) -> anyhow::Result<Option<PaperTrade>> {
        let row = paper_trades::table
            .filter(paper_trades::id.eq(id.to_string()))
            .first::<PaperTradeSQLite>(connection)
            .optional()?;
        row.map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .transpose()
    }

    fn list_open(connection: &mut SqliteConnection, user_id: &str) -> anyhow::Result<Vec<PaperTrade>> {
        let rows = paper_trades::table
            .filter(paper_trades::user_id.eq(user_id))
            .filter(paper_trades::status.eq("open"))
            .load::<PaperTradeSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }

    fn list_open_expiring_on(
        connection: &mut SqliteConnection,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>> {
        let rows = paper_trades::table
            .filter(paper_trades::user_id.eq(user_id))
            .filter(paper_trades::status.eq("open"))
            .filter(paper_trades::expiration.eq(date))
            .load::<PaperTradeSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }

    fn list_expiring_on(
        connection: &mut SqliteConnection,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>> {
        let rows = paper_trades::table
            .filter(paper_trades::user_id.eq(user_id))
            .filter(paper_trades::expiration.eq(date))
            .load::<PaperTradeSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }

    fn has_trade_on_date(
        connection: &mut SqliteConnection,
        user_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<bool> {
        use diesel::dsl::count_star;
        let created_start = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        let created_end = created_start + chrono::Duration::days(1);
        let n: i64 = paper_trades::table
            .filter(paper_trades::user_id.eq(user_id))
            .filter(paper_trades::symbol.eq(symbol))
            .filter(paper_trades::created_at.ge(created_start))
            .filter(paper_trades::created_at.lt(created_end))
            .select(count_star())
            .first(connection)?;
        Ok(n > 0)
    }
}

#[async_trait]
impl PaperTradeRead for Database {
    async fn get_trade(&self, id: Uuid) -> anyhow::Result<Option<PaperTrade>> {
        self.with_conn(move |conn| WorkerPaperTrade::get(conn, id)).await
    }

    async fn list_open_trades(&self, user_id: &str) -> anyhow::Result<Vec<PaperTrade>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| WorkerPaperTrade::list_open(conn, &user_id)).await
    }

    async fn list_open_trades_expiring_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| WorkerPaperTrade::list_open_expiring_on(conn, &user_id, date))
            .await
    }

    async fn has_trade_on_date(
        &self,
        user_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<bool> {
        let user_id = user_id.to_string();
        let symbol = symbol.to_string();
        self.with_conn(move |conn| WorkerPaperTrade::has_trade_on_date(conn, &user_id, &symbol, date))
            .await
    }

    async fn list_trades_expiring_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| WorkerPaperTrade::list_expiring_on(conn, &user_id, date))
            .await
    }
}

#[async_trait]
impl PaperTradeWrite for Database {
    async fn insert_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        let trade = trade.clone();
        self.with_conn(move |conn| WorkerPaperTrade::insert(conn, &trade)).await
    }

    async fn update_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        let trade = trade.clone();
        self.with_conn(move |conn| WorkerPaperTrade::update(conn, &trade)).await
    }
}
