use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which auth step an [`AuthStepRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthStep {
    /// Step 1: OAuth client-credentials exchange.
    Oauth,
    /// Step 2: SSO session creation.
    Sso,
    /// Step 3: `/sso/validate`.
    Validate,
    /// Step 4: tickle + `/iserver/auth/ssodh/init`.
    Init,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthStep::Oauth => "oauth",
            AuthStep::Sso => "sso",
            AuthStep::Validate => "validate",
            AuthStep::Init => "init",
        };
        f.write_str(s)
    }
}

/// One row of the session's four-step diagnostic snapshot.
///
/// `ensureReady` only reports `connected` once every step carries status 200
/// with a timestamp newer than the last `forceRefresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStepRecord {
    /// Which handshake step this record describes.
    pub step: AuthStep,
    /// HTTP status of the last attempt, if any.
    pub status: Option<u16>,
    /// When the last attempt completed.
    pub timestamp: Option<DateTime<Utc>>,
    /// Broker-supplied request id, when one was returned.
    pub request_id: Option<String>,
}

impl AuthStepRecord {
    /// A record for a step that has never been attempted.
    pub fn pending(step: AuthStep) -> Self {
        Self {
            step,
            status: None,
            timestamp: None,
            request_id: None,
        }
    }

    /// True once this step reports HTTP 200 and is newer than `since`.
    pub fn is_current(&self, since: DateTime<Utc>) -> bool {
        matches!(self.status, Some(200)) && self.timestamp.is_some_and(|ts| ts > since)
    }
}

/// A bearer token with a monotonic expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bearer {
    /// The raw token value.
    pub value: String,
    /// When this token stops being usable.
    pub expires_at: DateTime<Utc>,
}

impl Bearer {
    /// SSO bearer tokens default to this lifetime when the broker omits
    /// `expires_in` from the SSO-session response body.
    pub const DEFAULT_SSO_LIFETIME_SECS: i64 = 540;

    /// Margin before expiry at which callers must refresh rather than reuse.
    pub const REFRESH_MARGIN: chrono::Duration = chrono::Duration::seconds(5);

    /// Construct a bearer that expires `ttl` from `issued_at`.
    pub fn new(value: impl Into<String>, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: issued_at + ttl,
        }
    }

    /// True when fewer than [`Bearer::REFRESH_MARGIN`] remain before expiry.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= Self::REFRESH_MARGIN
    }

    /// True when the token is still inside its validity window.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Which broker environment a [`SessionState`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    /// Paper-trading sandbox.
    Paper,
    /// Real-money live environment.
    Live,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Paper => "paper",
            Environment::Live => "live",
        })
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paper" => Ok(Environment::Paper),
            "live" => Ok(Environment::Live),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Coarse lifecycle phase of a broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No handshake has succeeded yet, or a reset cleared everything.
    Disconnected,
    /// A handshake is currently in flight.
    Authenticating,
    /// All four steps are current; keep-alive only is required.
    Connected,
    /// Connected and the WS streamer is authenticated too.
    Streaming,
    /// Connected but keep-alive has lapsed; the next call must re-handshake.
    Stale,
    /// The last handshake attempt failed terminally.
    Error,
}

/// Per-credential-set session state (`spec.md` §3 "Session").
///
/// One instance exists per configured credential set; it is never a global
/// singleton (see `SPEC_FULL.md` §11 — callers hold an explicit handle).
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Broker base URL for this environment, e.g. `https://api.ibkr.com`.
    pub base_url: String,
    /// `paper` or `live`.
    pub environment: Environment,
    /// Broker account identifier, once selected.
    pub account_id: Option<String>,
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// The four handshake steps, keyed by step.
    pub oauth: AuthStepRecord,
    /// Validate step record.
    pub sso: AuthStepRecord,
    /// Validate step record.
    pub validate: AuthStepRecord,
    /// Init step record.
    pub init: AuthStepRecord,
    /// OAuth client-credentials bearer.
    pub oauth_bearer: Option<Bearer>,
    /// SSO session bearer; absent in cookie-only mode.
    pub sso_bearer: Option<Bearer>,
    /// True once `/ssodh/init` has returned 2xx.
    pub session_ready: bool,
    /// True once an account has been selected via `/iserver/account`.
    pub account_selected: bool,
    /// Last time `init`/tickle refreshed the keep-alive clock.
    pub last_init: Option<DateTime<Utc>>,
    /// Last time `/sso/validate` succeeded.
    pub last_validate: Option<DateTime<Utc>>,
    /// Timestamp of the most recent `forceRefresh`/credential reset.
    pub last_reset: Option<DateTime<Utc>>,
}

impl SessionState {
    /// A fresh, never-authenticated session for one credential set.
    pub fn new(base_url: impl Into<String>, environment: Environment, account_id: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            environment,
            account_id,
            phase: SessionPhase::Disconnected,
            oauth: AuthStepRecord::pending(AuthStep::Oauth),
            sso: AuthStepRecord::pending(AuthStep::Sso),
            validate: AuthStepRecord::pending(AuthStep::Validate),
            init: AuthStepRecord::pending(AuthStep::Init),
            oauth_bearer: None,
            sso_bearer: None,
            session_ready: false,
            account_selected: false,
            last_init: None,
            last_validate: None,
            last_reset: None,
        }
    }

    /// Invariant (a) from `spec.md` §3: connected requires all four steps
    /// current (status 200, timestamp after the last reset).
    pub fn is_fully_connected(&self) -> bool {
        let since = self.last_reset.unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);
        self.oauth.is_current(since)
            && self.sso.is_current(since)
            && self.validate.is_current(since)
            && self.init.is_current(since)
    }

    /// Clears all tokens and step records; called by `forceRefresh` and by
    /// the `SessionGoneError` recovery path (`spec.md` §4.1 step 4).
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.oauth = AuthStepRecord::pending(AuthStep::Oauth);
        self.sso = AuthStepRecord::pending(AuthStep::Sso);
        self.validate = AuthStepRecord::pending(AuthStep::Validate);
        self.init = AuthStepRecord::pending(AuthStep::Init);
        self.oauth_bearer = None;
        self.sso_bearer = None;
        self.session_ready = false;
        // account_selected survives a reset per invariant (c).
        self.phase = SessionPhase::Disconnected;
        self.last_reset = Some(now);
    }

    /// Freshness short-circuit from `spec.md` §4.1: when true, `ensureReady`
    /// only needs to perform keep-alive, not a full handshake.
    pub fn can_keep_alive_only(&self, now: DateTime<Utc>) -> bool {
        let oauth_fresh = self.oauth_bearer.as_ref().is_some_and(|b| !b.needs_refresh(now));
        let sso_fresh = self.sso_bearer.as_ref().is_some_and(|b| b.is_valid(now))
            && self
                .last_init
                .is_some_and(|t| now - t < chrono::Duration::seconds(540));
        let gateway_fresh =
            self.session_ready && matches!(self.validate.status, Some(200)) && matches!(self.init.status, Some(200));
        oauth_fresh && sso_fresh && gateway_fresh
    }

    /// `spec.md` §4.1 keep-alive rule: tickle is due once 240s have elapsed
    /// since the last successful init/tickle.
    pub fn keep_alive_due(&self, now: DateTime<Utc>) -> bool {
        self.last_init
            .is_none_or(|t| now - t > chrono::Duration::seconds(240))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    #[test]
    fn bearer_needs_refresh_within_five_second_margin() {
        let now = epoch() + chrono::Duration::seconds(100);
        let bearer = Bearer::new("tok", epoch(), chrono::Duration::seconds(104));
        assert!(bearer.needs_refresh(now));
        let bearer = Bearer::new("tok", epoch(), chrono::Duration::seconds(106));
        assert!(!bearer.needs_refresh(now));
    }

    #[test]
    fn fresh_session_is_not_fully_connected() {
        let session = SessionState::new("https://api.example.com", Environment::Paper, None);
        assert!(!session.is_fully_connected());
    }

    #[test]
    fn reset_preserves_account_selected() {
        let mut session = SessionState::new("https://api.example.com", Environment::Paper, Some("U123".into()));
        session.account_selected = true;
        session.reset(epoch());
        assert!(session.account_selected);
        assert!(!session.session_ready);
    }
}
