//! Market-data WebSocket streamer (C2): one authenticated connection per
//! credential set, a per-conid cache, and subscription replay across
//! reconnects.

pub mod backoff;
pub mod cache;
pub mod streamer;
pub mod wire;

pub use backoff::{BackoffConfig, ConnectionPhase, MAX_ATTEMPTS_PER_WINDOW};
pub use cache::SharedCache;
pub use streamer::{CredentialRefresh, MarketDataStreamer, UpdateEvent};
pub use wire::{apply_tick, parse_server_message, ServerMessage};
