//! Order & Position Service (C3): order submission, cancellation, and
//! realized-P&L computation against the broker's Client Portal API.

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

/// Account NAV reads.
pub mod account_summary;
/// Conid resolution for stocks and options.
pub mod conid;
/// Cancel-all and single-order cancellation.
pub mod cancel;
/// Broker execution (fill) history.
pub mod executions;
/// REST spot-price snapshots.
pub mod market_data;
/// Realized P&L computation for closed short-option positions.
pub mod pnl;
/// Broker position reconciliation.
pub mod positions;
/// The public `OrderService` contract.
pub mod service;
/// Order submission protocol.
pub mod submit;

pub use account_summary::get_account_nav;
pub use executions::{get_executions, Execution};
pub use market_data::{get_snapshot_price, get_snapshot_quote, Quote};
pub use positions::{get_positions, position_matches_leg, BrokerPosition};
pub use service::OrderService;
pub use submit::{parse_order_id, OrderRequest};

use thiserror::Error;

/// Every failure mode this crate's public contract can surface.
#[derive(Debug, Error)]
pub enum OrdersError {
    /// Broker rejected the order or a reply confirmation.
    #[error("order rejected: http {http_status}, body: {body_snippet}")]
    Rejected {
        /// HTTP status the broker returned.
        http_status: u16,
        /// A truncated response body snippet.
        body_snippet: String,
    },
    /// Network-level failure before a response was observed.
    #[error("transport error: {0}")]
    Transport(String),
    /// No conid could be resolved for the requested instrument
    /// (`spec.md` §4.3: "fatal to the order, audited as reason=no_conid").
    #[error(transparent)]
    NoConid(#[from] model::InstrumentResolutionError),
    /// The C1 session manager could not reach a ready state.
    #[error("session not ready: {0}")]
    SessionNotReady(String),
    /// A downstream persistence call failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}
