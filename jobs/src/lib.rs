//! Safety Jobs (C5): the `JobHandler` implementations that defend open
//! paper trades and keep the account's books current — position
//! monitoring, 0DTE risk closing, daily trade entry, trade reconciliation,
//! NAV snapshots, and assignment liquidation (`spec.md` §4.5).

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::float_arithmetic,
    clippy::arithmetic_side_effects,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

/// Detects and liquidates newly assigned stock positions.
pub mod assignment_monitor;
/// Sustained underlying-breach tracking for the Position Monitor.
pub mod breach_tracker;
/// In-memory per-(ET date) aggregation so routine ticks collapse to one
/// durable `JobRun`.
pub mod monitor_session;
/// `30 9 * * 1-5` and `15 16 * * 1-5` ET NAV reads.
pub mod nav_snapshot;
/// Every-5-minutes Layer 1 sustained-breach defense.
pub mod position_monitor;
/// The external strategy-engine port.
pub mod strategy;
/// Daily new-position entry.
pub mod trade_engine;
/// Every-30-minutes open-trade reconciliation.
pub mod trade_monitor;
/// 15:55/12:55 ET risky-delta closer.
pub mod zero_dte_closer;

pub use assignment_monitor::{AssignmentMonitor, AssignmentPricingPolicy, DefaultAssignmentPricing};
pub use nav_snapshot::NavSnapshotJob;
pub use position_monitor::PositionMonitor;
pub use strategy::{ProposedLeg, StrategyEngine, TradingDecision};
pub use trade_engine::TradeEngine;
pub use trade_monitor::TradeMonitor;
pub use zero_dte_closer::ZeroDteCloser;
