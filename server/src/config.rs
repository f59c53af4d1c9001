//! Environment-derived configuration (`spec.md` §6 "Environment/config
//! inputs per credential set"): one [`CredentialSetConfig`] per configured
//! user, a shared SQLite path, and the WS endpoint each credential set
//! dials.
//!
//! Grounded on the `env::var`-per-field pattern the pack's Polymarket bots
//! use ahead of a `tokio` main loop, adapted to this workspace's per-user
//! registry shape (`spec.md` §9 "handle registry keyed by user id").

use anyhow::{bail, Context, Result};
use ibkr_broker::Credentials;
use model::Environment;

/// Everything one credential set needs to run its own [`crate::context::AppContext`].
#[derive(Debug, Clone)]
pub struct CredentialSetConfig {
    /// The user id this credential set is keyed under.
    pub user_id: String,
    /// The single underlying symbol the Trade Engine trades for this user.
    pub symbol: String,
    /// The broker credentials this user authenticates with.
    pub credentials: Credentials,
    /// Market-data WebSocket URL this user's streamer dials.
    pub ws_url: String,
}

/// Top-level process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file (or `:memory:`).
    pub database_url: String,
    /// One entry per configured user; the process runs one [`crate::context::AppContext`]
    /// per entry.
    pub credential_sets: Vec<CredentialSetConfig>,
}

const KEYRING_SERVICE: &str = "options-desk";

impl Config {
    /// Load configuration from the process environment (after `.env`, via
    /// `dotenvy`, has already been applied by the caller).
    ///
    /// `OPTIONS_DESK_ACCOUNTS` is a comma-separated list of user ids; every
    /// other field is read per-user under an uppercased `{USER}_*` prefix,
    /// e.g. `ALICE_CLIENT_ID`, `ALICE_SYMBOL`.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "options_desk.sqlite".to_string());

        let accounts_raw = std::env::var("OPTIONS_DESK_ACCOUNTS")
            .context("OPTIONS_DESK_ACCOUNTS must list at least one user id")?;
        let mut credential_sets = Vec::new();
        for user_id in accounts_raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            credential_sets.push(load_credential_set(user_id)?);
        }
        if credential_sets.is_empty() {
            bail!("OPTIONS_DESK_ACCOUNTS was set but named no users");
        }

        Ok(Self { database_url, credential_sets })
    }
}

fn env_prefixed(user_id: &str, suffix: &str) -> String {
    let prefix: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{prefix}_{suffix}")
}

fn required(user_id: &str, suffix: &str) -> Result<String> {
    let key = env_prefixed(user_id, suffix);
    std::env::var(&key).with_context(|| format!("missing required env var {key}"))
}

fn optional(user_id: &str, suffix: &str) -> Option<String> {
    std::env::var(env_prefixed(user_id, suffix)).ok()
}

fn load_private_key_pem(user_id: &str) -> Result<String> {
    if let Some(path) = optional(user_id, "PRIVATE_KEY_PEM_PATH") {
        return std::fs::read_to_string(&path).with_context(|| format!("reading private key PEM at {path}"));
    }
    ibkr_broker::keys::Secret::read(KEYRING_SERVICE, user_id)
        .map(|secret| secret.private_key_pem)
        .with_context(|| format!("no {}_PRIVATE_KEY_PEM_PATH and no keyring entry for {user_id}", env_prefixed(user_id, "PRIVATE_KEY_PEM_PATH")))
}

fn load_credential_set(user_id: &str) -> Result<CredentialSetConfig> {
    let environment = match required(user_id, "ENVIRONMENT")?.as_str() {
        "paper" => Environment::Paper,
        "live" => Environment::Live,
        other => bail!("{user_id}: unknown environment {other:?}, expected paper|live"),
    };

    let credentials = Credentials {
        client_id: required(user_id, "CLIENT_ID")?,
        client_key_id: required(user_id, "CLIENT_KEY_ID")?,
        private_key_pem: load_private_key_pem(user_id)?,
        credential: required(user_id, "CREDENTIAL")?,
        allowed_ip: optional(user_id, "ALLOWED_IP"),
        account_id: optional(user_id, "ACCOUNT_ID"),
        environment,
        scope: optional(user_id, "SCOPE"),
        base_url: required(user_id, "BASE_URL")?,
    };

    Ok(CredentialSetConfig {
        user_id: user_id.to_string(),
        symbol: required(user_id, "SYMBOL")?,
        credentials,
        ws_url: required(user_id, "WS_URL")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_user_vars(user_id: &str) {
        std::env::set_var(env_prefixed(user_id, "ENVIRONMENT"), "paper");
        std::env::set_var(env_prefixed(user_id, "CLIENT_ID"), "client-id");
        std::env::set_var(env_prefixed(user_id, "CLIENT_KEY_ID"), "key-id");
        std::env::set_var(env_prefixed(user_id, "PRIVATE_KEY_PEM_PATH"), "/dev/null");
        std::env::set_var(env_prefixed(user_id, "CREDENTIAL"), "cred");
        std::env::set_var(env_prefixed(user_id, "BASE_URL"), "https://example.invalid");
        std::env::set_var(env_prefixed(user_id, "SYMBOL"), "SPY");
        std::env::set_var(env_prefixed(user_id, "WS_URL"), "wss://example.invalid/ws");
    }

    fn clear_user_vars(user_id: &str) {
        for suffix in [
            "ENVIRONMENT",
            "CLIENT_ID",
            "CLIENT_KEY_ID",
            "PRIVATE_KEY_PEM_PATH",
            "CREDENTIAL",
            "BASE_URL",
            "SYMBOL",
            "WS_URL",
            "ALLOWED_IP",
            "ACCOUNT_ID",
            "SCOPE",
        ] {
            std::env::remove_var(env_prefixed(user_id, suffix));
        }
    }

    #[test]
    fn env_prefixed_uppercases_and_replaces_non_alnum() {
        assert_eq!(env_prefixed("alice-01", "CLIENT_ID"), "ALICE_01_CLIENT_ID");
    }

    #[test]
    fn from_env_loads_one_credential_set_per_listed_account() {
        let _guard = env_lock().lock().expect("lock");
        set_user_vars("alicecfg");
        std::env::set_var("OPTIONS_DESK_ACCOUNTS", "alicecfg");
        std::env::remove_var("DATABASE_URL");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.database_url, "options_desk.sqlite");
        assert_eq!(config.credential_sets.len(), 1);
        let set = &config.credential_sets[0];
        assert_eq!(set.user_id, "alicecfg");
        assert_eq!(set.symbol, "SPY");
        assert_eq!(set.credentials.client_id, "client-id");
        assert_eq!(set.credentials.environment, Environment::Paper);

        clear_user_vars("alicecfg");
        std::env::remove_var("OPTIONS_DESK_ACCOUNTS");
    }

    #[test]
    fn from_env_rejects_missing_accounts_var() {
        let _guard = env_lock().lock().expect("lock");
        std::env::remove_var("OPTIONS_DESK_ACCOUNTS");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn from_env_rejects_unknown_environment() {
        let _guard = env_lock().lock().expect("lock");
        set_user_vars("badenvcfg");
        std::env::set_var(env_prefixed("badenvcfg", "ENVIRONMENT"), "sandbox");
        std::env::set_var("OPTIONS_DESK_ACCOUNTS", "badenvcfg");

        let result = Config::from_env();

        assert!(result.is_err());
        clear_user_vars("badenvcfg");
        std::env::remove_var("OPTIONS_DESK_ACCOUNTS");
    }
}
