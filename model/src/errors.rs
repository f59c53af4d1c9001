use crate::session::AuthStep;
use thiserror::Error;

/// Network/DNS-level failure. Retried with backoff by idempotent callers.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// A handshake step failed; surfaced to diagnostics and audited.
///
/// Per `spec.md` §7, a `validate`/`init` failure with status 401/403
/// triggers one reset-and-retry; every other combination bubbles up.
#[derive(Debug, Error)]
#[error("auth error at step {step}: http {http_status:?} (req {req_id:?})")]
pub struct AuthError {
    /// Which handshake step failed.
    pub step: AuthStep,
    /// HTTP status code, when the broker responded.
    pub http_status: Option<u16>,
    /// Broker request id, when present.
    pub req_id: Option<String>,
}

impl AuthError {
    /// True when this failure warrants the one-shot reset+retry
    /// (`validate`/`init` steps returning 401 or 403).
    pub fn warrants_retry(&self) -> bool {
        matches!(self.step, AuthStep::Validate | AuthStep::Init)
            && matches!(self.http_status, Some(401) | Some(403))
    }
}

/// HTTP 410 from `/ssodh/init`: the broker considers the session gone.
/// Forces a full credential clear and a single re-handshake.
#[derive(Debug, Error)]
#[error("session gone (HTTP 410); requires full re-handshake")]
pub struct SessionGoneError {
    /// Always true; kept as a field to mirror the target contract's shape.
    pub requires_refresh: bool,
}

impl Default for SessionGoneError {
    fn default() -> Self {
        Self { requires_refresh: true }
    }
}

/// `authenticated` or `connected` came back false from `/iserver/auth/status`
/// after a reauthenticate attempt, even after one retry.
#[derive(Debug, Error)]
#[error("gateway not authenticated/connected after retry")]
pub struct GatewayError;

/// A submitted order was rejected by the broker. Terminal: never retried
/// automatically, always recorded in the audit trail and order ledger.
#[derive(Debug, Error)]
#[error("order rejected: http {http_status}, body: {body_snippet}")]
pub struct OrderRejection {
    /// HTTP status the broker returned for the order POST.
    pub http_status: u16,
    /// A truncated snippet of the response body for diagnostics.
    pub body_snippet: String,
}

/// No conid could be resolved for an instrument; the order is not placed.
#[derive(Debug, Error)]
#[error("could not resolve a conid for {symbol:?}")]
pub struct InstrumentResolutionError {
    /// The symbol or option descriptor that failed to resolve.
    pub symbol: String,
}

/// Cached market data is older than the caller's freshness threshold.
#[derive(Debug, Error)]
#[error("market data for conid {conid} is stale (age {age_ms}ms > max {max_age_ms}ms)")]
pub struct StaleDataError {
    /// The conid whose cache entry is stale.
    pub conid: i64,
    /// Observed age of the cache entry in milliseconds.
    pub age_ms: i64,
    /// The caller's maximum acceptable age in milliseconds.
    pub max_age_ms: i64,
}

/// An error frame arrived on a market-data subscription. Cleared
/// automatically once a good tick resumes for the same conid.
#[derive(Debug, Error)]
#[error("subscription error for conid {conid}: {message}")]
pub struct SubscriptionError {
    /// The conid the error frame referenced.
    pub conid: i64,
    /// The broker's error text, verbatim.
    pub message: String,
}

impl SubscriptionError {
    /// True when the error text indicates the WS auth handshake itself
    /// failed, which per `spec.md` §4.2 must trigger
    /// `forceReconnectWithFreshCredentials` rather than just being recorded.
    pub fn is_authentication_failure(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("not authenticated") || lower.contains("authentication")
    }
}
