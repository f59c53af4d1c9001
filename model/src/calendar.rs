use chrono::{DateTime, Utc};

/// Detail behind an early-close determination (`spec.md` §4.4
/// `isEarlyCloseDay`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyCloseInfo {
    /// True when `now`'s ET calendar day is an early-close session.
    pub is_early_close: bool,
    /// Human-readable reason, e.g. `"day after Thanksgiving"`.
    pub reason: Option<String>,
}

/// The market-calendar port consumed by the scheduler and the safety jobs
/// (`spec.md` §4.4). Deliberately out of this crate's concrete
/// implementation — holiday/early-close data is an external collaborator
/// (`spec.md` §1 treats economic-calendar ingestion as out of scope) — but
/// the contract every handler codes against lives here.
pub trait MarketCalendar: Send + Sync {
    /// Honors weekends, exchange holidays, and early closes.
    fn is_market_open(&self, now: DateTime<Utc>) -> bool;

    /// `"15:55"` on normal days, `"12:55"` on early-close days, both
    /// expressed in ET `HH:MM`.
    fn exit_deadline(&self, now: DateTime<Utc>) -> String;

    /// ET calendar-day string, `YYYY-MM-DD`.
    fn et_date_string(&self, now: DateTime<Utc>) -> String;

    /// ET wall-clock string, `HH:MM`.
    fn et_time_string(&self, now: DateTime<Utc>) -> String;

    /// Whether `now`'s ET session is an early close, and why.
    fn is_early_close_day(&self, now: DateTime<Utc>) -> EarlyCloseInfo;
}
