//! Domain Model Crate - Core Entities for the Options Gateway
//!
//! This crate defines the domain entities shared by every component of the
//! broker integration core: the session state machine (C1), the market-data
//! cache (C2), the order ledger and paper-trade ledger (C3), the job
//! scheduler's definitions (C4), and the error taxonomy consumed by the
//! safety jobs (C5). Persistence is modeled as an abstract port; no crate in
//! this workspace hard-codes a storage engine here.

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

/// Market-calendar port consumed by the scheduler and safety jobs.
pub mod calendar;
/// Error taxonomy shared across the session, streamer, and order service.
pub mod errors;
/// Job definitions and job-run outcomes (C4).
pub mod job;
/// Per-conid market-data cache entry and subscription bookkeeping (C2).
pub mod market_data;
/// NAV snapshot entity.
pub mod nav_snapshot;
/// OCC option symbol parsing.
pub mod occ;
/// Order ledger entity (C3).
pub mod order;
/// Paper-trade (logical position) entity (C3/C5).
pub mod paper_trade;
/// Abstract persistence port.
pub mod persistence;
/// Broker session state machine entities (C1).
pub mod session;

pub use calendar::{EarlyCloseInfo, MarketCalendar};
pub use errors::{
    AuthError, AuthStep, GatewayError, InstrumentResolutionError, OrderRejection,
    SessionGoneError, StaleDataError, SubscriptionError, TransportError,
};
pub use job::{JobDefinition, JobOutcome, JobResult, JobRun};
pub use market_data::{InstrumentKind, MarketDataCacheEntry, Subscription};
pub use nav_snapshot::{NavSnapshot, SnapshotType};
pub use occ::{OccSymbol, OccSymbolParseError, OptionRight};
pub use order::{OrderRecord, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use paper_trade::{
    AssignmentDetails, Bias, PaperTrade, PaperTradeLeg, PaperTradeStatus,
};
pub use persistence::{
    JobRunRead, JobRunWrite, LatestPriceWrite, NavSnapshotWrite, OrderLedgerRead, OrderLedgerWrite,
    PaperTradeRead, PaperTradeWrite, PersistenceFactory, SessionAuditWrite,
};
pub use session::{AuthStepRecord, Bearer, Environment, SessionPhase, SessionState};
