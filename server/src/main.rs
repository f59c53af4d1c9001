//! Process entrypoint (`spec.md` §9: "explicit handles owned by a
//! top-level application context ... one handle per credential set").
//!
//! Loads configuration, builds one [`context::AppContext`] per configured
//! user, starts each user's scheduler and market-data streamer, and runs
//! until a shutdown signal. Each streamer's reconnect loop already owns
//! its own retry/backoff state machine (`broker_sync::MarketDataStreamer::run`),
//! so the main loop here only needs to wait for ctrl-c and then disconnect
//! every context in turn.

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

mod config;
mod context;
mod strategy_stub;

use anyhow::Result;
use config::Config;
use context::AppContext;
use db::Database;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::from_env()?;
    let db = Arc::new(Database::new(&config.database_url)?);

    let mut contexts = Vec::with_capacity(config.credential_sets.len());
    for credential_set in &config.credential_sets {
        let mut ctx = AppContext::build(credential_set, db.clone()).await?;
        ctx.start().await?;
        info!(user_id = %ctx.user_id, "started scheduler and streamer");
        contexts.push(ctx);
    }

    let mut streamer_handles = Vec::with_capacity(contexts.len());
    for ctx in &contexts {
        let streamer = ctx.streamer.clone();
        streamer_handles.push(tokio::spawn(async move { streamer.run().await }));
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler, shutting down anyway");
    }
    info!("received shutdown signal");

    for mut ctx in contexts {
        if let Err(err) = ctx.shutdown().await {
            error!(user_id = %ctx.user_id, error = %err, "error during shutdown");
        }
    }
    for handle in streamer_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "streamer task panicked");
        }
    }

    Ok(())
}
