//! `OrderService` (`spec.md` §4.3): the public contract tying conid
//! resolution, submission, cancellation, and realized-P&L together with
//! the order and paper-trade ledgers.

use crate::account_summary::get_account_nav;
use crate::cancel::{cancel_all_orders, cancel_order};
use crate::conid::{resolve_conid, resolve_option_conid};
use crate::executions::{get_executions, Execution};
use crate::market_data::{get_snapshot_price, get_snapshot_quote, Quote};
use crate::pnl::{compute_realized_pnl, matches_leg, MatchedExecution};
use crate::positions::{get_positions, BrokerPosition};
use crate::submit::{submit_orders, OrderRequest};
use crate::OrdersError;
use chrono::Utc;
use ibkr_broker::session::IbkrSession;
use model::occ::OptionRight;
use model::order::{OrderRecord, OrderSide, OrderStatus, OrderType, TimeInForce};
use model::persistence::{OrderLedgerWrite, PaperTradeWrite};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A bracket stop expressed as a multiple of the entry premium
/// (`spec.md` §4.3 "placeOptionOrderWithStop").
#[derive(Debug, Clone, Copy)]
pub struct StopConfig {
    /// Multiple of the entry premium at which the protective stop triggers.
    pub premium_multiple: Decimal,
}

/// Order & Position Service (C3): the sole writer of the `orders` and
/// `paper_trades` tables (`spec.md` §5).
#[derive(Debug)]
pub struct OrderService {
    session: Arc<IbkrSession>,
    acct_id: String,
    order_ledger: Arc<dyn OrderLedgerWrite>,
    paper_trade_ledger: Arc<dyn PaperTradeWrite>,
}

impl OrderService {
    /// Construct a service bound to one credential set's session and its
    /// account id.
    pub fn new(
        session: Arc<IbkrSession>,
        acct_id: String,
        order_ledger: Arc<dyn OrderLedgerWrite>,
        paper_trade_ledger: Arc<dyn PaperTradeWrite>,
    ) -> Self {
        Self {
            session,
            acct_id,
            order_ledger,
            paper_trade_ledger,
        }
    }

    /// `placeStockOrder` — resolve the stock's conid and submit a single
    /// order, recording the result in the order ledger regardless of
    /// whether a broker order id came back (`spec.md` §4.3 step 5).
    pub async fn place_stock_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
        order_type: OrderType,
        limit_price: Option<Decimal>,
    ) -> Result<OrderRecord, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;

        let conid = resolve_conid(&client, symbol).await?;
        let request = OrderRequest {
            acct_id: self.acct_id.clone(),
            conid,
            order_type,
            side,
            tif: TimeInForce::Day,
            quantity,
            price: limit_price,
            outside_rth: false,
        };

        let broker_order_id = submit_orders(&client, &[request]).await?;
        if broker_order_id.is_none() {
            warn!(symbol, "order submitted but no broker order id could be parsed");
        }

        let mut record = OrderRecord::new_submitted(symbol, side, quantity, order_type, limit_price, Utc::now());
        record.broker_order_id = broker_order_id;
        self.order_ledger.insert_order(&record).await?;
        Ok(record)
    }

    /// `placeOptionOrder` — resolve the option's conid via
    /// `resolveOptionConid` and submit a single order.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_option_order(
        &self,
        underlying: &str,
        occ_symbol: &str,
        expiration: &str,
        right: OptionRight,
        strike: Decimal,
        side: OrderSide,
        quantity: u32,
        order_type: OrderType,
        limit_price: Option<Decimal>,
    ) -> Result<OrderRecord, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;

        let conid = resolve_option_conid(&client, underlying, expiration, right, strike).await?;
        let request = OrderRequest {
            acct_id: self.acct_id.clone(),
            conid,
            order_type,
            side,
            tif: TimeInForce::Day,
            quantity,
            price: limit_price,
            outside_rth: false,
        };

        let broker_order_id = submit_orders(&client, &[request]).await?;
        if broker_order_id.is_none() {
            warn!(symbol = occ_symbol, "order submitted but no broker order id could be parsed");
        }

        let mut record = OrderRecord::new_submitted(occ_symbol, side, quantity, order_type, limit_price, Utc::now());
        record.broker_order_id = broker_order_id;
        self.order_ledger.insert_order(&record).await?;
        Ok(record)
    }

    /// `placeOptionOrderWithStop` — a parent entry order plus a bracket
    /// stop child at `stop.premium_multiple` times the entry premium
    /// (`spec.md` §4.3).
    #[allow(clippy::too_many_arguments)]
    pub async fn place_option_order_with_stop(
        &self,
        underlying: &str,
        occ_symbol: &str,
        expiration: &str,
        right: OptionRight,
        strike: Decimal,
        side: OrderSide,
        quantity: u32,
        entry_premium: Decimal,
        stop: StopConfig,
    ) -> Result<(OrderRecord, OrderRecord), OrdersError> {
        let parent = self
            .place_option_order(
                underlying,
                occ_symbol,
                expiration,
                right,
                strike,
                side,
                quantity,
                OrderType::Limit,
                Some(entry_premium),
            )
            .await?;

        let stop_price = entry_premium * stop.premium_multiple;
        let mut child = self
            .place_option_order(
                underlying,
                occ_symbol,
                expiration,
                right,
                strike,
                side.opposite(),
                quantity,
                OrderType::Stop,
                Some(stop_price),
            )
            .await?;

        child.parent_id = Some(parent.id);
        self.order_ledger.update_order(&child).await?;

        let mut parent_with_child = parent.clone();
        parent_with_child.child_ids.push(child.id);
        self.order_ledger.update_order(&parent_with_child).await?;

        Ok((parent_with_child, child))
    }

    /// `placeCloseOrderByConid` — submit a closing order directly against a
    /// known conid, bypassing resolution (used when the closing leg's
    /// conid is already cached from entry, `spec.md` §4.3/§4.5).
    pub async fn place_close_order_by_conid(
        &self,
        conid: i64,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
        order_type: OrderType,
        limit_price: Option<Decimal>,
    ) -> Result<OrderRecord, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;

        let request = OrderRequest {
            acct_id: self.acct_id.clone(),
            conid,
            order_type,
            side,
            tif: TimeInForce::Day,
            quantity,
            price: limit_price,
            outside_rth: false,
        };
        let broker_order_id = submit_orders(&client, &[request]).await?;

        let mut record = OrderRecord::new_submitted(symbol, side, quantity, order_type, limit_price, Utc::now());
        record.broker_order_id = broker_order_id;
        self.order_ledger.insert_order(&record).await?;
        Ok(record)
    }

    /// Submit a stock limit order eligible to trade outside regular hours
    /// (`spec.md` §4.5 Assignment Monitor: "limit sell orders
    /// `outsideRTH=true`").
    pub async fn place_stock_limit_order_outside_rth(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
        limit_price: Decimal,
    ) -> Result<OrderRecord, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;

        let conid = resolve_conid(&client, symbol).await?;
        let request = OrderRequest {
            acct_id: self.acct_id.clone(),
            conid,
            order_type: OrderType::Limit,
            side,
            tif: TimeInForce::Day,
            quantity,
            price: Some(limit_price),
            outside_rth: true,
        };

        let broker_order_id = submit_orders(&client, &[request]).await?;
        if broker_order_id.is_none() {
            warn!(symbol, "order submitted but no broker order id could be parsed");
        }

        let mut record = OrderRecord::new_submitted(symbol, side, quantity, OrderType::Limit, Some(limit_price), Utc::now());
        record.broker_order_id = broker_order_id;
        self.order_ledger.insert_order(&record).await?;
        Ok(record)
    }

    /// `getOpenOrders` — the broker's live open-order list.
    pub async fn get_open_orders(&self) -> Result<Vec<serde_json::Value>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        crate::cancel::get_open_orders(&client, &self.acct_id).await
    }

    /// The broker's live position list, for reconciliation against open
    /// paper-trades (`spec.md` §4.3/§4.5).
    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        get_positions(&client, &self.acct_id).await
    }

    /// `cancelOrder` — cancel a single broker order, marking the local
    /// ledger record cancelled on success.
    pub async fn cancel_order(&self, order: &OrderRecord) -> Result<(), OrdersError> {
        let Some(broker_order_id) = &order.broker_order_id else {
            return Ok(());
        };
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        cancel_order(&client, &self.acct_id, broker_order_id).await?;

        let mut updated = order.clone();
        updated.status = OrderStatus::Cancelled;
        self.order_ledger.update_order(&updated).await?;
        Ok(())
    }

    /// `cancelAllOrders` — broker-first with local-ledger fallback
    /// (`spec.md` §4.3).
    pub async fn cancel_all_orders(&self, local_open_orders: Vec<OrderRecord>) -> Result<usize, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        cancel_all_orders(&client, &self.acct_id, &self.order_ledger, local_open_orders).await
    }

    /// The broker's recent fills, used to compute realized P&L
    /// (`spec.md` §4.3/§4.5).
    pub async fn get_executions(&self) -> Result<Vec<Execution>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        get_executions(&client, &self.acct_id).await
    }

    /// Resolve `underlying`'s conid, then snapshot its last-trade price
    /// (`spec.md` §4.5 0DTE Closer: "resolve spot prices for each
    /// underlying").
    pub async fn get_spot_price(&self, underlying: &str) -> Result<Option<Decimal>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        let conid = resolve_conid(&client, underlying).await?;
        get_snapshot_price(&client, conid).await
    }

    /// Resolve `underlying`'s conid, then snapshot its last/bid/ask
    /// (`spec.md` §4.5 Assignment Monitor: "adjusting the limit by an
    /// increasing fraction below bid").
    pub async fn get_spot_quote(&self, underlying: &str) -> Result<Option<Quote>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        let conid = resolve_conid(&client, underlying).await?;
        get_snapshot_quote(&client, conid).await
    }

    /// Current account NAV (`portfolioValue`, else `netLiquidation`),
    /// for the NAV Snapshot job (`spec.md` §4.5).
    pub async fn get_account_nav(&self) -> Result<Option<Decimal>, OrdersError> {
        self.session.ensure_ready(false).await.map_err(|e| OrdersError::SessionNotReady(e.to_string()))?;
        let client = self.session.authenticated_client().await;
        get_account_nav(&client, &self.acct_id).await
    }

    /// Persist a newly opened `paper_trade` row (`spec.md` §4.5 Trade
    /// Engine: "persist a paper_trade row with both legs").
    pub async fn insert_paper_trade(&self, trade: &model::paper_trade::PaperTrade) -> Result<(), OrdersError> {
        self.paper_trade_ledger.insert_trade(trade).await?;
        Ok(())
    }

    /// Persist an in-place `paper_trade` update. The sole write path the
    /// safety jobs use for status transitions they compute themselves
    /// (expiration, reconciled-closed, assignment) — `OrderService` stays
    /// the one writer of the table (`spec.md` §5).
    pub async fn update_paper_trade(&self, trade: &model::paper_trade::PaperTrade) -> Result<(), OrdersError> {
        self.paper_trade_ledger.update_trade(trade).await?;
        Ok(())
    }

    /// Close a short-option leg against observed broker executions,
    /// compute realized P&L, and persist the closed trade
    /// (`spec.md` §4.3).
    pub async fn record_leg_close<'a>(
        &self,
        trade_id: Uuid,
        leg: &model::occ::OccSymbol,
        executions: impl Iterator<Item = (&'a str, Decimal, u32)>,
        entry_premium_total: Decimal,
        expired: bool,
        mut trade: model::paper_trade::PaperTrade,
    ) -> Result<model::paper_trade::PaperTrade, OrdersError> {
        let matched: Vec<MatchedExecution> = matches_leg(executions, leg);
        let outcome = compute_realized_pnl(&matched, entry_premium_total, expired);

        trade.id = trade_id;
        trade.status = model::paper_trade::PaperTradeStatus::Closed;
        trade.exit_price = Some(outcome.avg_exit_price);
        trade.exit_reason = Some(outcome.exit_reason);
        trade.realized_pnl = Some(outcome.realized_pnl);
        trade.closed_at = Some(Utc::now());

        self.paper_trade_ledger.update_trade(&trade).await?;
        Ok(trade)
    }
}
