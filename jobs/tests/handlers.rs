//! Integration tests driving each safety job's [`scheduler::JobHandler`]
//! directly, against fake calendar/persistence ports and a throwaway
//! broker session. Deliberately scoped to the branches reachable without
//! a live IBKR handshake (`spec.md` §4.1 — the six-step handshake is
//! exercised by `ibkr-broker`'s own tests): market-hours/idempotency
//! guards, and the reconciliation paths that resolve without touching the
//! broker at all.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ibkr_broker::session::IbkrSession;
use ibkr_broker::Credentials;
use jobs::strategy::{StrategyEngine, TradingDecision};
use jobs::{AssignmentMonitor, NavSnapshotJob, PositionMonitor, TradeEngine, TradeMonitor, ZeroDteCloser};
use model::calendar::{EarlyCloseInfo, MarketCalendar};
use model::nav_snapshot::{NavSnapshot, SnapshotType};
use model::occ::OptionRight;
use model::paper_trade::{Bias, PaperTrade, PaperTradeLeg, PaperTradeStatus};
use model::persistence::{NavSnapshotWrite, OrderLedgerWrite, PaperTradeRead, PaperTradeWrite};
use model::JobResult;
use orders::OrderService;
use rust_decimal_macros::dec;
use scheduler::JobHandler;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const TEST_KEY: &str = include_str!("../../ibkr-broker/tests/fixtures/test_rsa_key.pem");

fn throwaway_session() -> Arc<IbkrSession> {
    let credentials = Credentials {
        client_id: "client-123".into(),
        client_key_id: "key-1".into(),
        private_key_pem: TEST_KEY.into(),
        credential: "trader1".into(),
        allowed_ip: None,
        account_id: None,
        environment: model::Environment::Paper,
        scope: None,
        base_url: "https://example.invalid".to_string(),
    };
    Arc::new(IbkrSession::new(credentials, None).expect("session construction does no I/O"))
}

#[derive(Default)]
struct FakeOrderLedger;

#[async_trait]
impl OrderLedgerWrite for FakeOrderLedger {
    async fn insert_order(&self, _order: &model::order::OrderRecord) -> anyhow::Result<()> {
        Ok(())
    }
    async fn update_order(&self, _order: &model::order::OrderRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakePaperTradeLedger {
    updates: Mutex<Vec<PaperTrade>>,
}

#[async_trait]
impl PaperTradeWrite for FakePaperTradeLedger {
    async fn insert_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        self.updates.lock().expect("lock").push(trade.clone());
        Ok(())
    }
    async fn update_trade(&self, trade: &PaperTrade) -> anyhow::Result<()> {
        self.updates.lock().expect("lock").push(trade.clone());
        Ok(())
    }
}

fn order_service(paper_trade_ledger: Arc<FakePaperTradeLedger>) -> Arc<OrderService> {
    let order_ledger: Arc<dyn OrderLedgerWrite> = Arc::new(FakeOrderLedger);
    let paper_trade_ledger: Arc<dyn PaperTradeWrite> = paper_trade_ledger;
    Arc::new(OrderService::new(throwaway_session(), "U12345".to_string(), order_ledger, paper_trade_ledger))
}

/// A calendar with every answer fixed at construction, so tests control
/// exactly which guard in a handler's `execute()` is exercised.
struct FakeCalendar {
    open: bool,
    et_time: &'static str,
    et_date: &'static str,
    exit_deadline: &'static str,
}

impl Default for FakeCalendar {
    fn default() -> Self {
        Self { open: true, et_time: "10:00", et_date: "2026-03-02", exit_deadline: "15:55" }
    }
}

impl MarketCalendar for FakeCalendar {
    fn is_market_open(&self, _now: DateTime<Utc>) -> bool {
        self.open
    }
    fn exit_deadline(&self, _now: DateTime<Utc>) -> String {
        self.exit_deadline.to_string()
    }
    fn et_date_string(&self, _now: DateTime<Utc>) -> String {
        self.et_date.to_string()
    }
    fn et_time_string(&self, _now: DateTime<Utc>) -> String {
        self.et_time.to_string()
    }
    fn is_early_close_day(&self, _now: DateTime<Utc>) -> EarlyCloseInfo {
        EarlyCloseInfo { is_early_close: false, reason: None }
    }
}

#[derive(Default)]
struct FakePaperTradeStore {
    open_trades: Vec<PaperTrade>,
    expiring_trades: Vec<PaperTrade>,
    has_trade_today: bool,
}

#[async_trait]
impl PaperTradeRead for FakePaperTradeStore {
    async fn get_trade(&self, _id: Uuid) -> anyhow::Result<Option<PaperTrade>> {
        Ok(None)
    }
    async fn list_open_trades(&self, _user_id: &str) -> anyhow::Result<Vec<PaperTrade>> {
        Ok(self.open_trades.clone())
    }
    async fn list_open_trades_expiring_on(&self, _user_id: &str, _date: NaiveDate) -> anyhow::Result<Vec<PaperTrade>> {
        Ok(self.expiring_trades.clone())
    }
    async fn has_trade_on_date(&self, _user_id: &str, _symbol: &str, _date: NaiveDate) -> anyhow::Result<bool> {
        Ok(self.has_trade_today)
    }
    async fn list_trades_expiring_on(&self, _user_id: &str, _date: NaiveDate) -> anyhow::Result<Vec<PaperTrade>> {
        Ok(self.expiring_trades.clone())
    }
}

#[derive(Default)]
struct FakeNavSnapshotWrite {
    snapshots: Mutex<Vec<NavSnapshot>>,
}

#[async_trait]
impl NavSnapshotWrite for FakeNavSnapshotWrite {
    async fn upsert_nav_snapshot(&self, snapshot: &NavSnapshot) -> anyhow::Result<()> {
        self.snapshots.lock().expect("lock").push(snapshot.clone());
        Ok(())
    }
}

struct DecliningStrategy;

#[async_trait]
impl StrategyEngine for DecliningStrategy {
    async fn decide(&self, symbol: &str, _now: DateTime<Utc>) -> anyhow::Result<TradingDecision> {
        Ok(TradingDecision {
            can_trade: false,
            strategy: format!("declined-for-{symbol}"),
            contracts: 0,
            expiration: Utc::now().date_naive(),
            put_leg: None,
            call_leg: None,
        })
    }
}

fn open_trade_missing_call_leg() -> PaperTrade {
    PaperTrade {
        id: Uuid::new_v4(),
        user_id: "tester".to_string(),
        symbol: "SPY".to_string(),
        strategy: "short-put".to_string(),
        bias: Bias::Short,
        contracts: 1,
        put_leg: Some(PaperTradeLeg { strike: dec!(680), right: OptionRight::Put, premium: dec!(1.50), conid: Some(1), delta_at_entry: None }),
        call_leg: None,
        entry_premium_total: dec!(150.00),
        expiration: NaiveDate::from_ymd_opt(2026, 3, 20).expect("valid date"),
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

fn expired_strangle_trade(expiration: NaiveDate, entry_premium_total: rust_decimal::Decimal) -> PaperTrade {
    PaperTrade {
        id: Uuid::new_v4(),
        user_id: "tester".to_string(),
        symbol: "SPY".to_string(),
        strategy: "short-strangle".to_string(),
        bias: Bias::Short,
        contracts: 1,
        put_leg: Some(PaperTradeLeg { strike: dec!(600), right: OptionRight::Put, premium: dec!(1.00), conid: Some(1), delta_at_entry: None }),
        call_leg: Some(PaperTradeLeg { strike: dec!(700), right: OptionRight::Call, premium: dec!(1.00), conid: Some(2), delta_at_entry: None }),
        entry_premium_total,
        expiration,
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
async fn position_monitor_skips_when_market_closed() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { open: false, ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let monitor = PositionMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("market closed"));
}

#[tokio::test]
async fn position_monitor_skips_outside_monitoring_hours() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { et_time: "20:00", ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let monitor = PositionMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("outside monitoring hours"));
}

#[tokio::test]
async fn position_monitor_ignores_single_leg_trades_without_touching_the_broker() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar::default());
    let store = FakePaperTradeStore { open_trades: vec![open_trade_missing_call_leg()], ..Default::default() };
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(store);
    let monitor = PositionMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("aggregated"));
}

#[tokio::test]
async fn trade_monitor_skips_when_market_closed() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { open: false, ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let monitor = TradeMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("market closed"));
}

#[tokio::test]
async fn trade_monitor_closes_expired_trades_without_touching_the_broker() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar::default());
    let expired = NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date");
    let trade = expired_strangle_trade(expired, dec!(200.00));
    let store = FakePaperTradeStore { open_trades: vec![trade.clone()], ..Default::default() };
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(store);
    let ledger = Arc::new(FakePaperTradeLedger::default());
    let monitor = TradeMonitor::new("tester", calendar, paper_trades, order_service(ledger.clone()));

    let result = monitor.execute().await;
    assert!(result.success);
    assert!(!result.skipped);
    assert_eq!(result.data, Some(serde_json::json!({"reconciled": 1})));

    let updates = ledger.updates.lock().expect("lock");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, PaperTradeStatus::Expired);
    assert_eq!(updates[0].realized_pnl, Some(dec!(200.00)));
    assert_eq!(updates[0].exit_reason.as_deref(), Some("Expired, full premium retained"));
}

#[tokio::test]
async fn zero_dte_closer_skips_outside_the_exit_deadline_window() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { et_time: "10:00", exit_deadline: "15:55", ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let closer = ZeroDteCloser::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = closer.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("not within the exit-deadline window for this firing"));
}

#[tokio::test]
async fn zero_dte_closer_skips_when_nothing_expires_today() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { et_time: "15:55", exit_deadline: "15:55", ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let closer = ZeroDteCloser::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = closer.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("no 0DTE trades expiring today"));
}

#[tokio::test]
async fn assignment_monitor_skips_when_market_closed() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { open: false, ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let monitor = AssignmentMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("not a trading day"));
}

#[tokio::test]
async fn assignment_monitor_skips_when_no_recently_expired_trades() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar::default());
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let monitor = AssignmentMonitor::new("tester", calendar, paper_trades, order_service(Arc::new(FakePaperTradeLedger::default())));

    let result = monitor.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("no recently expired trades to check"));
}

#[tokio::test]
async fn trade_engine_skips_when_market_closed() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { open: false, ..Default::default() });
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let engine = TradeEngine::new(
        "tester",
        "SPY",
        calendar,
        paper_trades,
        order_service(Arc::new(FakePaperTradeLedger::default())),
        Arc::new(DecliningStrategy),
    );

    let result = engine.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("market closed"));
}

#[tokio::test]
async fn trade_engine_skips_when_already_entered_today() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar::default());
    let store = FakePaperTradeStore { has_trade_today: true, ..Default::default() };
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(store);
    let engine = TradeEngine::new(
        "tester",
        "SPY",
        calendar,
        paper_trades,
        order_service(Arc::new(FakePaperTradeLedger::default())),
        Arc::new(DecliningStrategy),
    );

    let result = engine.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("already entered a trade today"));
}

#[tokio::test]
async fn trade_engine_skips_when_the_strategy_engine_declines() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar::default());
    let paper_trades: Arc<dyn PaperTradeRead> = Arc::new(FakePaperTradeStore::default());
    let engine = TradeEngine::new(
        "tester",
        "SPY",
        calendar,
        paper_trades,
        order_service(Arc::new(FakePaperTradeLedger::default())),
        Arc::new(DecliningStrategy),
    );

    let result = engine.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("strategy engine declined to trade"));
}

#[tokio::test]
async fn nav_snapshot_skips_when_market_closed() {
    let calendar: Arc<dyn MarketCalendar> = Arc::new(FakeCalendar { open: false, ..Default::default() });
    let nav_snapshots: Arc<dyn NavSnapshotWrite> = Arc::new(FakeNavSnapshotWrite::default());
    let job = NavSnapshotJob::new("tester", SnapshotType::Opening, calendar, order_service(Arc::new(FakePaperTradeLedger::default())), nav_snapshots);

    let result = job.execute().await;
    assert!(result.skipped);
    assert_eq!(result.reason.as_deref(), Some("not a trading day"));
    assert_eq!(job.id(), "nav-snapshot-opening");
}
