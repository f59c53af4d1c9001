use model::{AuthError, GatewayError, SessionGoneError, TransportError};
use thiserror::Error;

/// Every failure mode the session manager's public contract can surface.
///
/// A thin wrapper over the shared `model` error taxonomy (`spec.md` §7)
/// plus the transport/signing failures specific to this crate.
#[derive(Debug, Error)]
pub enum IbkrError {
    /// A handshake step failed (`AuthError{step}`).
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// HTTP 410 on init; requires a full re-handshake.
    #[error(transparent)]
    SessionGone(#[from] SessionGoneError),
    /// Gateway not authenticated/connected after the retry.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Network/DNS failure before any HTTP response was observed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// JWT signing failed (malformed key, clock skew in claims, etc).
    #[error("failed to sign handshake JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// The underlying HTTP client itself errored (build, TLS, etc).
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Secret storage (keyring) failed.
    #[error(transparent)]
    Keyring(#[from] keyring::Error),
}
