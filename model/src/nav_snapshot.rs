use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a [`NavSnapshot`] was taken at market open or market close
/// (`spec.md` §4.5 "NAV Snapshot").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotType {
    /// Taken at `30 9 * * 1-5` ET.
    Opening,
    /// Taken at `15 16 * * 1-5` ET.
    Closing,
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SnapshotType::Opening => "opening",
            SnapshotType::Closing => "closing",
        })
    }
}

/// Net asset value recorded once per (date, type, user) (`spec.md` §3).
///
/// Invariant: at most one row per `(date, snapshot_type, user_id)`; later
/// writes for the same key update in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSnapshot {
    /// ET calendar day the snapshot was taken.
    pub date: NaiveDate,
    /// Opening or closing.
    pub snapshot_type: SnapshotType,
    /// Net asset value (`portfolioValue`, else `netLiquidation`).
    pub nav: Decimal,
    /// Owning user id.
    pub user_id: String,
}
