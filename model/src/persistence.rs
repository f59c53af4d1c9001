use crate::job::{JobDefinition, JobRun};
use crate::nav_snapshot::NavSnapshot;
use crate::order::OrderRecord;
use crate::paper_trade::PaperTrade;
use crate::session::AuthStep;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One row written to the `sessions_audit` table for every handshake-step
/// outcome (`spec.md` §4.1: "All auth-step outcomes are written to an audit
/// sink.").
#[derive(Debug, Clone)]
pub struct SessionAuditEntry {
    /// Credential set this audit row belongs to.
    pub credential_id: String,
    /// Which handshake step produced this outcome.
    pub step: AuthStep,
    /// HTTP status observed, if any.
    pub status: Option<u16>,
    /// Broker request id, if any.
    pub request_id: Option<String>,
    /// Truncated response body, for non-2xx outcomes.
    pub body_snippet: Option<String>,
    /// When this outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Writer for the `sessions_audit` table. Every component in this crate
/// treats persistence as write-mostly: the diagnostics panel reads live
/// in-memory [`crate::session::SessionState`], not the audit log.
#[async_trait]
pub trait SessionAuditWrite: Send + Sync {
    /// Append one audit row. Never fails the caller's handshake step; the
    /// caller logs and continues on a write error.
    async fn record_auth_step(&self, entry: SessionAuditEntry) -> anyhow::Result<()>;
}

/// Writer for the `latest_prices` table (`spec.md` §4.2 persistence
/// side-effect). Keyed by `symbol` per the unique constraint in `spec.md`
/// §6.
#[async_trait]
pub trait LatestPriceWrite: Send + Sync {
    /// Debounced upsert of one symbol's latest tick.
    async fn upsert_latest_price(
        &self,
        symbol: &str,
        conid: i64,
        price: Option<Decimal>,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        source: &str,
        updated_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Rehydrate all known latest prices on startup so consumers see
    /// last-known values immediately, before the first WS tick arrives.
    async fn load_latest_prices(&self) -> anyhow::Result<Vec<LatestPriceRow>>;
}

/// One rehydrated row from `latest_prices`.
#[derive(Debug, Clone)]
pub struct LatestPriceRow {
    /// Ticker symbol.
    pub symbol: String,
    /// Broker conid.
    pub conid: i64,
    /// Last known price.
    pub price: Option<Decimal>,
    /// Last known bid.
    pub bid: Option<Decimal>,
    /// Last known ask.
    pub ask: Option<Decimal>,
    /// When this row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Reader for the `orders` table; the Order & Position Service is the
/// sole writer (`spec.md` §5 shared-resource policy).
#[async_trait]
pub trait OrderLedgerRead: Send + Sync {
    /// Fetch one order by its local id.
    async fn get_order(&self, id: Uuid) -> anyhow::Result<Option<OrderRecord>>;

    /// Fetch all orders still eligible for cancellation (submitted/partial).
    async fn list_open_orders(&self) -> anyhow::Result<Vec<OrderRecord>>;
}

/// Writer for the `orders` table.
#[async_trait]
pub trait OrderLedgerWrite: Send + Sync {
    /// Insert a newly submitted order.
    async fn insert_order(&self, order: &OrderRecord) -> anyhow::Result<()>;

    /// Persist an in-place update (status/fill transitions).
    async fn update_order(&self, order: &OrderRecord) -> anyhow::Result<()>;
}

/// Reader for the `paper_trades` table.
#[async_trait]
pub trait PaperTradeRead: Send + Sync {
    /// Fetch one trade by id.
    async fn get_trade(&self, id: Uuid) -> anyhow::Result<Option<PaperTrade>>;

    /// All open trades for a user, used by the position monitor and
    /// trade monitor.
    async fn list_open_trades(&self, user_id: &str) -> anyhow::Result<Vec<PaperTrade>>;

    /// Open trades expiring on `date` (ET calendar day), used by the 0DTE
    /// closer (`spec.md` §4.5).
    async fn list_open_trades_expiring_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>>;

    /// Idempotency check for the daily trade engine: has a trade already
    /// been entered for `symbol` on `date` ET (`spec.md` §4.5 "Trade
    /// Engine").
    async fn has_trade_on_date(
        &self,
        user_id: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<bool>;

    /// Trades of any status expiring on `date`, used by the Assignment
    /// Monitor to revisit yesterday's expirations once more the next
    /// trading morning (`spec.md` §4.5 "Assignment Monitor").
    async fn list_trades_expiring_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<PaperTrade>>;
}

/// Writer for the `paper_trades` table. The Order & Position Service is
/// the sole writer (`spec.md` §5).
#[async_trait]
pub trait PaperTradeWrite: Send + Sync {
    /// Insert a newly opened trade.
    async fn insert_trade(&self, trade: &PaperTrade) -> anyhow::Result<()>;

    /// Persist an in-place update (close/expire/exercise transitions).
    async fn update_trade(&self, trade: &PaperTrade) -> anyhow::Result<()>;
}

/// Writer for the `nav_snapshots` table. Unique on `(date, snapshot_type,
/// user_id)` (`spec.md` §6); implementations upsert.
#[async_trait]
pub trait NavSnapshotWrite: Send + Sync {
    /// Insert-or-update the snapshot for its `(date, snapshot_type,
    /// user_id)` key.
    async fn upsert_nav_snapshot(&self, snapshot: &NavSnapshot) -> anyhow::Result<()>;
}

/// Reader/writer for the `jobs` and `job_runs` tables.
#[async_trait]
pub trait JobRunRead: Send + Sync {
    /// All enabled job definitions, for the scheduler's minute tick.
    async fn list_enabled_jobs(&self) -> anyhow::Result<Vec<JobDefinition>>;

    /// Whether a [`JobRun`] already exists for `(job_id, minute)`, used to
    /// enforce the at-most-once-per-minute testable property
    /// (`spec.md` §8).
    async fn has_run_this_minute(&self, job_id: &str, minute: DateTime<Utc>) -> anyhow::Result<bool>;
}

/// Writer half of the job-run persistence port.
#[async_trait]
pub trait JobRunWrite: Send + Sync {
    /// Upsert a job definition (`ensureJob`, `spec.md` §4.4).
    async fn ensure_job(&self, job: &JobDefinition) -> anyhow::Result<()>;

    /// Persist a durable [`JobRun`]. Routine aggregated skips are not
    /// passed to this method at all (`spec.md` §4.4).
    async fn record_job_run(&self, run: &JobRun) -> anyhow::Result<()>;
}

/// Aggregate handle bundling every persistence trait this workspace needs,
/// mirroring the teacher's `DatabaseFactory` (one reader/writer pair per
/// entity, composed behind a single constructible handle) generalized to
/// this domain's eight tables.
pub trait PersistenceFactory:
    SessionAuditWrite
    + LatestPriceWrite
    + OrderLedgerRead
    + OrderLedgerWrite
    + PaperTradeRead
    + PaperTradeWrite
    + NavSnapshotWrite
    + JobRunRead
    + JobRunWrite
{
}

impl<T> PersistenceFactory for T where
    T: SessionAuditWrite
        + LatestPriceWrite
        + OrderLedgerRead
        + OrderLedgerWrite
        + PaperTradeRead
        + PaperTradeWrite
        + NavSnapshotWrite
        + JobRunRead
        + JobRunWrite
{
}
