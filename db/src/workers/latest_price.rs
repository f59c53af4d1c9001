//! `latest_prices` table: debounced per-symbol quote cache
//! (`spec.md` §4.2 persistence side-effect; unique on `symbol`, §6).

use crate::database::Database;
use crate::error::{ConversionError, IntoDomainModel};
use crate::schema::latest_prices;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use model::persistence::{LatestPriceRow, LatestPriceWrite};
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = latest_prices)]
#[diesel(treat_none_as_null = true)]
struct NewLatestPriceRow {
    symbol: String,
    conid: i64,
    price: Option<String>,
    bid: Option<String>,
    ask: Option<String>,
    source: String,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Queryable)]
struct LatestPriceSQLite {
    symbol: String,
    conid: i64,
    price: Option<String>,
    bid: Option<String>,
    ask: Option<String>,
    #[allow(dead_code)]
    source: String,
    updated_at: chrono::NaiveDateTime,
}

impl IntoDomainModel<LatestPriceRow> for LatestPriceSQLite {
    fn into_domain_model(self) -> Result<LatestPriceRow, ConversionError> {
        let parse_decimal = |field: &'static str, value: Option<String>| {
            value
                .map(|v| {
                    Decimal::from_str(&v)
                        .map_err(|_| ConversionError::new(field, "invalid decimal"))
                })
                .transpose()
        };
        Ok(LatestPriceRow {
            symbol: self.symbol,
            conid: self.conid,
            price: parse_decimal("price", self.price)?,
            bid: parse_decimal("bid", self.bid)?,
            ask: parse_decimal("ask", self.ask)?,
            updated_at: DateTime::<Utc>::from_naive_utc_and_offset(self.updated_at, Utc),
        })
    }
}

pub(crate) struct WorkerLatestPrice;

impl WorkerLatestPrice {
    fn upsert(
        connection: &mut SqliteConnection,
        symbol: String,
        conid: i64,
        price: Option<Decimal>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        source: String,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let row = NewLatestPriceRow {
            symbol,
            conid,
            price: price.map(|d| d.to_string()),
            bid: bid.map(|d| d.to_string()),
            ask: ask.map(|d| d.to_string()),
            source,
            updated_at: updated_at.naive_utc(),
        };
        diesel::insert_into(latest_prices::table)
            .values(&row)
            .on_conflict(latest_prices::symbol)
            .do_update()
            .set(&row)
            .execute(connection)?;
        Ok(())
    }

    fn load_all(connection: &mut SqliteConnection) -> anyhow::Result<Vec<LatestPriceRow>> {
        let rows = latest_prices::table.load::<LatestPriceSQLite>(connection)?;
        rows.into_iter()
            .map(|r| r.into_domain_model().map_err(anyhow::Error::from))
            .collect()
    }
}

#[async_trait]
impl LatestPriceWrite for Database {
    async fn upsert_latest_price(
        &self,
        symbol: &str,
        conid: i64,
        price: Option<Decimal>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        source: &str,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let symbol = symbol.to_string();
        let source = source.to_string();
        self.with_conn(move |conn| {
            WorkerLatestPrice::upsert(conn, symbol, conid, price, bid, ask, source, updated_at)
        })
        .await
    }

    async fn load_latest_prices(&self) -> anyhow::Result<Vec<LatestPriceRow>> {
        self.with_conn(WorkerLatestPrice::load_all).await
    }
}
