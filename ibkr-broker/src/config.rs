use model::Environment;

/// One configured credential set (`spec.md` §6 "Environment/config
/// inputs per credential set").
#[derive(Debug, Clone)]
pub struct Credentials {
    /// OAuth client id, also used as the `iss`/`sub` JWT claim.
    pub client_id: String,
    /// Key id the broker expects in the JWT `kid` header.
    pub client_key_id: String,
    /// PKCS#8 PEM RSA private key used to sign both handshake JWTs.
    pub private_key_pem: String,
    /// Broker-issued credential username, used in the SSO-session claims.
    pub credential: String,
    /// Optional IP to bind the SSO session to.
    pub allowed_ip: Option<String>,
    /// Broker account id to select, if any.
    pub account_id: Option<String>,
    /// `paper` or `live`.
    pub environment: Environment,
    /// OAuth scope; defaults to `sso-sessions.write` when unset.
    pub scope: Option<String>,
    /// Broker Client Portal base URL for this environment.
    pub base_url: String,
}

impl Credentials {
    /// Default scope when the caller hasn't configured one
    /// (`spec.md` §4.1 step 1).
    pub const DEFAULT_SCOPE: &'static str = "sso-sessions.write";

    /// The scope to present in the OAuth token request.
    pub fn scope_or_default(&self) -> &str {
        self.scope.as_deref().unwrap_or(Self::DEFAULT_SCOPE)
    }
}
