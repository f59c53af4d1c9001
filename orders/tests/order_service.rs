//! Cross-module integration tests for the `orders` crate: conid resolution
//! chained with the full submit-then-confirm-interstitial wire protocol
//! (`spec.md` §4.3 steps 2-4), and `OrderService::record_leg_close` tying
//! execution matching to realized P&L and the paper-trade ledger.

use async_trait::async_trait;
use chrono::Utc;
use httpmock::prelude::*;
use ibkr_broker::session::{AuthenticatedClient, IbkrSession};
use ibkr_broker::Credentials;
use model::occ::{OccSymbol, OptionRight};
use model::paper_trade::{Bias, PaperTrade, PaperTradeLeg, PaperTradeStatus};
use model::persistence::{OrderLedgerWrite, PaperTradeWrite};
use orders::conid::resolve_conid;
use orders::service::OrderService;
use orders::submit::{parse_order_id, submit_orders, OrderRequest};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const TEST_KEY: &str = include_str!("../../ibkr-broker/tests/fixtures/test_rsa_key.pem");

fn client(base_url: String) -> AuthenticatedClient {
    AuthenticatedClient { http: reqwest::Client::new(), base_url, bearer: None }
}

fn throwaway_session(base_url: String) -> Arc<IbkrSession> {
    let credentials = Credentials {
        client_id: "client-123".into(),
        client_key_id: "key-1".into(),
        private_key_pem: TEST_KEY.into(),
        credential: "trader1".into(),
        allowed_ip: None,
        account_id: None,
        environment: model::Environment::Paper,
        scope: None,
        base_url,
    };
    Arc::new(IbkrSession::new(credentials, None).expect("session construction does no I/O"))
}

#[derive(Default)]
struct FakeOrderLedger {
    orders: Mutex<Vec<model::order::OrderRecord>>,
}

#[async_trait]
impl OrderLedgerWrite for FakeOrderLedger {
    async fn insert_order(&self, order: &model::order::OrderRecord) -> anyhow::Result<()> {
        self.orders.lock().expect("lock").push(order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &model::order::OrderRecord) -> anyhow::Result<()> {
        self.orders.lock().expect("lock").push(order.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakePaperTradeLedger {
    trades: Mutex<Vec<PaperTrade>>,
}

#[async_trait]
impl PaperTradeWrite for FakePaperTradeLedger {
    async fn insert_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        self.trades.lock().expect("lock").push(trade.clone());
        Ok(())
    }

    async fn update_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        self.trades.lock().expect("lock").push(trade.clone());
        Ok(())
    }
}

fn open_short_put_trade() -> PaperTrade {
    PaperTrade {
        id: Uuid::new_v4(),
        user_id: "tester".to_string(),
        symbol: "SPY".to_string(),
        strategy: "short-put".to_string(),
        bias: Bias::Short,
        contracts: 1,
        put_leg: Some(PaperTradeLeg {
            strike: dec!(680),
            right: OptionRight::Put,
            premium: dec!(150.00),
            conid: Some(9999),
            delta_at_entry: None,
        }),
        call_leg: None,
        entry_premium_total: dec!(150.00),
        expiration: Utc::now().date_naive(),
        status: PaperTradeStatus::Open,
        exit_price: None,
        exit_reason: None,
        realized_pnl: None,
        assignment: None,
        created_at: Utc::now(),
        closed_at: None,
        source: "test".to_string(),
    }
}

#[tokio::test]
async fn conid_resolution_feeds_submission_through_an_interstitial_confirmation() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/iserver/secdef/search");
        then.status(200).json_body(serde_json::json!([{"conid": "756733", "symbol": "SPY"}]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/iserver/account/U12345/orders");
        then.status(200).json_body(serde_json::json!([{"id": "q-1", "message": ["confirm?"]}]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/iserver/reply/q-1");
        then.status(200).json_body(serde_json::json!([{"order_id": "broker-991"}]));
    });

    let client = client(server.base_url());
    let conid = resolve_conid(&client, "SPY").await.expect("conid resolves");
    assert_eq!(conid, 756733);

    let request = OrderRequest {
        acct_id: "U12345".to_string(),
        conid,
        order_type: model::order::OrderType::Market,
        side: model::order::OrderSide::Buy,
        tif: model::order::TimeInForce::Day,
        quantity: 1,
        price: None,
        outside_rth: false,
    };
    let order_id = submit_orders(&client, &[request]).await.expect("submission succeeds");
    assert_eq!(order_id.as_deref(), Some("broker-991"));
}

#[tokio::test]
async fn parse_order_id_accepts_whatever_the_confirmed_reply_returns() {
    let raw = serde_json::json!([{"order_id": "broker-991"}]);
    assert_eq!(parse_order_id(&raw), Some("broker-991".to_string()));
}

#[tokio::test]
async fn record_leg_close_matches_executions_and_persists_realized_pnl() {
    let server = MockServer::start();
    let session = throwaway_session(server.base_url());
    let order_ledger: Arc<dyn OrderLedgerWrite> = Arc::new(FakeOrderLedger::default());
    let paper_trade_ledger = Arc::new(FakePaperTradeLedger::default());
    let service = OrderService::new(session, "U12345".to_string(), order_ledger, paper_trade_ledger.clone());

    let trade = open_short_put_trade();
    let leg = OccSymbol { underlying: "SPY".to_string(), expiration: trade.expiration, right: OptionRight::Put, strike: dec!(680) };
    let executions = vec![("SPY   251215P00680000", dec!(0.50), 1u32)];

    let closed = service
        .record_leg_close(trade.id, &leg, executions.into_iter(), dec!(150.00), false, trade.clone())
        .await
        .expect("close should succeed");

    assert_eq!(closed.status, PaperTradeStatus::Closed);
    assert_eq!(closed.realized_pnl, Some(dec!(100.00)));
    assert_eq!(closed.exit_reason.as_deref(), Some("Closed"));
    assert_eq!(paper_trade_ledger.trades.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn record_leg_close_treats_expired_with_no_fills_as_worthless() {
    let server = MockServer::start();
    let session = throwaway_session(server.base_url());
    let order_ledger: Arc<dyn OrderLedgerWrite> = Arc::new(FakeOrderLedger::default());
    let paper_trade_ledger = Arc::new(FakePaperTradeLedger::default());
    let service = OrderService::new(session, "U12345".to_string(), order_ledger, paper_trade_ledger);

    let trade = open_short_put_trade();
    let leg = OccSymbol { underlying: "SPY".to_string(), expiration: trade.expiration, right: OptionRight::Put, strike: dec!(680) };

    let closed = service
        .record_leg_close(trade.id, &leg, std::iter::empty(), dec!(150.00), true, trade.clone())
        .await
        .expect("close should succeed");

    assert_eq!(closed.realized_pnl, Some(dec!(150.00)));
    assert_eq!(closed.exit_reason.as_deref(), Some("Expired worthless"));
}
