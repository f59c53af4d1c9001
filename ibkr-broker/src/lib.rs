//! C1 Broker Session Manager
//!
//! Drives the four-step OAuth→SSO→validate→init handshake against the
//! broker's Client Portal API, keeps the session alive with periodic
//! tickles, and exposes an authenticated HTTP client to the rest of the
//! workspace. See [`session::IbkrSession`] for the public contract.

#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

/// Per-credential-set configuration.
pub mod config;
/// This crate's error type.
pub mod error;
/// Secret (private key) storage via the OS keyring.
pub mod keys;
/// JWT signing for the OAuth and SSO handshake steps.
mod jwt;
/// The session state machine and its public contract.
pub mod session;

pub use config::Credentials;
pub use error::IbkrError;
pub use session::{AuthenticatedClient, Diagnostics, IbkrSession};
