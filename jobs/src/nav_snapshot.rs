//! NAV Snapshot (`spec.md` §4.5): two cron firings share this handler —
//! `30 9 * * 1-5` (opening) and `15 16 * * 1-5` (closing) ET. Which one
//! fired is passed in at construction, not inferred from the clock.

use async_trait::async_trait;
use chrono::Utc;
use model::calendar::MarketCalendar;
use model::nav_snapshot::{NavSnapshot, SnapshotType};
use model::persistence::NavSnapshotWrite;
use model::JobResult;
use orders::OrderService;
use scheduler::JobHandler;
use std::sync::Arc;

/// Reads the account's current NAV and upserts the snapshot row for this
/// firing's `(date, snapshot_type, user_id)` key.
pub struct NavSnapshotJob {
    user_id: String,
    snapshot_type: SnapshotType,
    calendar: Arc<dyn MarketCalendar>,
    order_service: Arc<OrderService>,
    nav_snapshots: Arc<dyn NavSnapshotWrite>,
}

impl NavSnapshotJob {
    /// Construct a snapshot job bound to one user, one firing (opening or
    /// closing), and the order service that reads NAV.
    pub fn new(
        user_id: impl Into<String>,
        snapshot_type: SnapshotType,
        calendar: Arc<dyn MarketCalendar>,
        order_service: Arc<OrderService>,
        nav_snapshots: Arc<dyn NavSnapshotWrite>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            snapshot_type,
            calendar,
            order_service,
            nav_snapshots,
        }
    }
}

#[async_trait]
impl JobHandler for NavSnapshotJob {
    fn id(&self) -> &str {
        match self.snapshot_type {
            SnapshotType::Opening => "nav-snapshot-opening",
            SnapshotType::Closing => "nav-snapshot-closing",
        }
    }

    fn name(&self) -> &str {
        match self.snapshot_type {
            SnapshotType::Opening => "NAV Snapshot (Opening)",
            SnapshotType::Closing => "NAV Snapshot (Closing)",
        }
    }

    async fn execute(&self) -> JobResult {
        let now = Utc::now();
        if !self.calendar.is_market_open(now) {
            return JobResult::skipped("not a trading day");
        }

        let nav = match self.order_service.get_account_nav().await {
            Ok(nav) => nav,
            Err(err) => return JobResult::failed(err.to_string(), None),
        };
        let Some(nav) = nav else {
            return JobResult::failed("broker reported no portfolioValue or netLiquidation", None);
        };

        let date = crate::position_monitor::et_naive_date(self.calendar.as_ref(), now);
        let snapshot = NavSnapshot {
            date,
            snapshot_type: self.snapshot_type,
            nav,
            user_id: self.user_id.clone(),
        };
        if let Err(err) = self.nav_snapshots.upsert_nav_snapshot(&snapshot).await {
            return JobResult::failed(err.to_string(), None);
        }

        let mut result = JobResult::success();
        result.data = Some(serde_json::json!({"nav": nav.to_string(), "snapshotType": self.snapshot_type.to_string()}));
        result
    }
}
