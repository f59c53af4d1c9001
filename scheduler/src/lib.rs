//! Job Scheduler (C4): handler registration, minute-granularity cron
//! dispatch against a declared IANA time zone, and the concrete market
//! calendar the safety jobs consult.

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

/// The concrete `America/New_York` market calendar.
pub mod calendar;
/// The dispatch loop, handler registry, and per-handler-id lock.
pub mod dispatcher;
/// The `JobHandler` contract.
pub mod handler;

pub use calendar::NyseCalendar;
pub use dispatcher::{JobRunStore, Scheduler, SchedulerError};
pub use handler::JobHandler;
