use crate::config::Credentials;
use crate::error::IbkrError;
use crate::jwt::{sign_oauth_jwt, sign_sso_jwt};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use model::persistence::{SessionAuditEntry, SessionAuditWrite};
use model::session::{AuthStep, AuthStepRecord, Bearer, SessionPhase, SessionState};
use model::{AuthError, GatewayError, SessionGoneError};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// A read-only snapshot of the four handshake steps, for the diagnostics
/// panel (`spec.md` §4.1 `getDiagnostics`).
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// OAuth step record.
    pub oauth: AuthStepRecord,
    /// SSO step record.
    pub sso: AuthStepRecord,
    /// Validate step record.
    pub validate: AuthStepRecord,
    /// Init step record.
    pub init: AuthStepRecord,
}

/// An HTTP client carrying the session's cookie jar and, where required,
/// the SSO bearer (`spec.md` §4.1 `authenticatedClient`).
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// Underlying HTTP client, pre-configured with the shared cookie jar.
    pub http: reqwest::Client,
    /// Broker base URL for this credential set's environment.
    pub base_url: String,
    /// SSO bearer value, when one is available (cookie-only mode has none).
    pub bearer: Option<String>,
}

impl AuthenticatedClient {
    /// Start a request builder for a path relative to `base_url`, attaching
    /// the `Authorization: Bearer` header when an SSO bearer is present.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(bearer) = &self.bearer {
            builder = builder.bearer_auth(bearer);
        }
        builder
    }
}

/// The C1 Broker Session Manager: drives the four-step OAuth→SSO→validate→
/// init handshake, keeps the session alive, and hands out an
/// [`AuthenticatedClient`] to callers.
///
/// One instance per configured credential set (`SPEC_FULL.md` §11 — never
/// a module-level singleton).
#[derive(Debug)]
pub struct IbkrSession {
    credentials: Credentials,
    http: reqwest::Client,
    cookie_jar: Arc<Jar>,
    state: Mutex<SessionState>,
    /// Serializes `ensure_ready` so only one handshake runs at a time;
    /// concurrent callers block until it completes (`spec.md` §5).
    handshake_lock: Mutex<()>,
    audit: Option<Arc<dyn SessionAuditWrite>>,
}

impl IbkrSession {
    /// Construct a session manager for one credential set. Does not
    /// perform any network I/O; the first `ensure_ready` call does.
    pub fn new(
        credentials: Credentials,
        audit: Option<Arc<dyn SessionAuditWrite>>,
    ) -> Result<Self, IbkrError> {
        let cookie_jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(cookie_jar.clone())
            .build()?;
        let environment = credentials.environment;
        let account_id = credentials.account_id.clone();
        let base_url = credentials.base_url.clone();
        Ok(Self {
            credentials,
            http,
            cookie_jar,
            state: Mutex::new(SessionState::new(base_url, environment, account_id)),
            handshake_lock: Mutex::new(()),
            audit,
        })
    }

    /// `getDiagnostics` — a read-only phase snapshot (`spec.md` §4.1).
    pub async fn get_diagnostics(&self) -> Diagnostics {
        let state = self.state.lock().await;
        Diagnostics {
            oauth: state.oauth.clone(),
            sso: state.sso.clone(),
            validate: state.validate.clone(),
            init: state.init.clone(),
        }
    }

    /// `authenticatedClient` — the cookie-jar-carrying HTTP client, with the
    /// SSO bearer attached when one exists.
    pub async fn authenticated_client(&self) -> AuthenticatedClient {
        let state = self.state.lock().await;
        AuthenticatedClient {
            http: self.http.clone(),
            base_url: self.credentials.base_url.clone(),
            bearer: state.sso_bearer.as_ref().map(|b| b.value.clone()),
        }
    }

    /// `refreshSsoBearerForWs` — the callback C2 registers and invokes to
    /// redial with fresh credentials (`spec.md` §4.1, §9 "cyclic reference"
    /// guidance — the WS streamer never imports or owns a session).
    pub async fn refresh_sso_bearer_for_ws(&self) -> Result<(String, Option<String>), IbkrError> {
        self.ensure_ready(false).await?;
        let state = self.state.lock().await;
        let cookie_string = self.cookie_string();
        Ok((cookie_string, state.sso_bearer.as_ref().map(|b| b.value.clone())))
    }

    fn cookie_string(&self) -> String {
        let url = match Url::parse(&self.credentials.base_url) {
            Ok(u) => u,
            Err(_) => return String::new(),
        };
        self.cookie_jar
            .cookies(&url)
            .and_then(|hv| hv.to_str().ok().map(str::to_string))
            .unwrap_or_default()
    }

    /// `forceRefresh` — full tear-down and re-handshake.
    pub async fn force_refresh(&self) -> Result<(), IbkrError> {
        self.ensure_ready(true).await
    }

    /// `ensureReady(forceRefresh)` — drives the handshake, or keep-alive
    /// only when the freshness short-circuit applies (`spec.md` §4.1).
    pub async fn ensure_ready(&self, force_refresh: bool) -> Result<(), IbkrError> {
        let _guard = self.handshake_lock.lock().await;
        let now = Utc::now();

        if force_refresh {
            let mut state = self.state.lock().await;
            state.reset(now);
        }

        let (keep_alive_only, keep_alive_due) = {
            let state = self.state.lock().await;
            (state.can_keep_alive_only(now), state.keep_alive_due(now))
        };

        if keep_alive_only {
            if keep_alive_due {
                self.tickle(now).await?;
            }
            return Ok(());
        }

        self.run_handshake(now).await
    }

    /// The full six-step handshake (`spec.md` §4.1), run with the
    /// handshake lock already held by `ensure_ready`.
    async fn run_handshake(&self, now: DateTime<Utc>) -> Result<(), IbkrError> {
        {
            let mut state = self.state.lock().await;
            state.phase = SessionPhase::Authenticating;
        }

        if let Err(err) = self.step1_oauth(now).await {
            self.mark_error_phase().await;
            return Err(err);
        }

        if let Err(err) = self.step2_sso(now).await {
            self.mark_error_phase().await;
            return Err(err);
        }

        if let Err(err) = self.step3_validate_with_retry().await {
            self.mark_error_phase().await;
            return Err(err);
        }

        if let Err(err) = self.step4_tickle_then_init().await {
            self.mark_error_phase().await;
            return Err(err);
        }

        if let Err(err) = self.step5_gateway_establish().await {
            self.mark_error_phase().await;
            return Err(err);
        }

        self.step6_account_selection().await?;

        {
            let mut state = self.state.lock().await;
            state.phase = SessionPhase::Connected;
        }
        Ok(())
    }

    async fn mark_error_phase(&self) {
        let mut state = self.state.lock().await;
        state.phase = SessionPhase::Error;
    }

    async fn audit_step(
        &self,
        step: AuthStep,
        status: Option<u16>,
        request_id: Option<String>,
        body_snippet: Option<String>,
    ) {
        if let Some(audit) = &self.audit {
            let entry = SessionAuditEntry {
                credential_id: self.credentials.client_id.clone(),
                step,
                status,
                request_id,
                body_snippet,
                recorded_at: Utc::now(),
            };
            if let Err(err) = audit.record_auth_step(entry).await {
                warn!(error = %err, "failed to write session audit row");
            }
        }
    }

    /// Step 1: OAuth client-credentials exchange (`spec.md` §4.1 step 1).
    async fn step1_oauth(&self, now: DateTime<Utc>) -> Result<(), IbkrError> {
        let token_url = format!("{}/oauth2/api/v1/token", self.credentials.base_url);
        let jwt = sign_oauth_jwt(
            &self.credentials.client_id,
            &self.credentials.client_key_id,
            &token_url,
            &self.credentials.private_key_pem,
        )?;

        let form = [
            ("grant_type", "client_credentials"),
            ("scope", self.credentials.scope_or_default()),
            (
                "client_assertion_type",
                "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
            ),
            ("client_assertion", jwt.as_str()),
        ];

        debug!(url = %token_url, "oauth token request");
        let response = self.http.post(&token_url).form(&form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let access_token = parsed
                .get("access_token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let expires_in = parsed.get("expires_in").and_then(Value::as_i64).unwrap_or(60);

            let mut state = self.state.lock().await;
            state.oauth_bearer = Some(Bearer::new(access_token, now, ChronoDuration::milliseconds(expires_in * 1000)));
            state.oauth = AuthStepRecord {
                step: AuthStep::Oauth,
                status: Some(status),
                timestamp: Some(now),
                request_id: None,
            };
            drop(state);
            self.audit_step(AuthStep::Oauth, Some(status), None, None).await;
            Ok(())
        } else {
            let snippet: String = body.chars().take(256).collect();
            self.audit_step(AuthStep::Oauth, Some(status), None, Some(snippet)).await;
            Err(IbkrError::Auth(AuthError {
                step: AuthStep::Oauth,
                http_status: Some(status),
                req_id: None,
            }))
        }
    }

    /// Step 2: SSO session creation (`spec.md` §4.1 step 2).
    async fn step2_sso(&self, now: DateTime<Utc>) -> Result<(), IbkrError> {
        let oauth_token = {
            let state = self.state.lock().await;
            state
                .oauth_bearer
                .as_ref()
                .map(|b| b.value.clone())
                .unwrap_or_default()
        };

        let jwt = sign_sso_jwt(
            &self.credentials.credential,
            &self.credentials.client_id,
            &self.credentials.client_key_id,
            self.credentials.allowed_ip.as_deref(),
            &self.credentials.private_key_pem,
        )?;

        let sso_url = format!("{}/gw/api/v1/sso-sessions", self.credentials.base_url);
        let response = self
            .http
            .post(&sso_url)
            .header("Content-Type", "application/jwt")
            .bearer_auth(&oauth_token)
            .body(jwt)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            let snippet: String = body.chars().take(256).collect();
            self.audit_step(AuthStep::Sso, Some(status), None, Some(snippet)).await;
            return Err(IbkrError::Auth(AuthError {
                step: AuthStep::Sso,
                http_status: Some(status),
                req_id: None,
            }));
        }

        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let bearer_value = ["access_token", "token", "bearer_token", "session_token", "sso_token", "authToken", "auth_token"]
            .iter()
            .find_map(|key| parsed.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let expires_in = parsed
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(Bearer::DEFAULT_SSO_LIFETIME_SECS);

        {
            let mut state = self.state.lock().await;
            state.sso_bearer = bearer_value.map(|v| Bearer::new(v, now, ChronoDuration::seconds(expires_in)));
            state.sso = AuthStepRecord {
                step: AuthStep::Sso,
                status: Some(status),
                timestamp: Some(now),
                request_id: None,
            };
        }
        self.audit_step(AuthStep::Sso, Some(status), None, None).await;

        // Broker-required settle delay before validate.
        sleep(Duration::from_secs(3)).await;
        Ok(())
    }

    /// Step 3: `/sso/validate`, tried with SSO bearer, then OAuth bearer,
    /// then cookies-only, retrying once with a full re-handshake on
    /// repeated 401/403 (`spec.md` §4.1 step 3).
    async fn step3_validate_with_retry(&self) -> Result<(), IbkrError> {
        match self.step3_validate().await {
            Ok(()) => Ok(()),
            Err(IbkrError::Auth(err)) if err.warrants_retry() => {
                let now = Utc::now();
                {
                    let mut state = self.state.lock().await;
                    state.sso_bearer = None;
                    state.reset(now);
                }
                self.step1_oauth(now).await?;
                self.step2_sso(now).await?;
                self.step3_validate().await
            }
            Err(other) => Err(other),
        }
    }

    async fn step3_validate(&self) -> Result<(), IbkrError> {
        let validate_url = format!("{}/v1/api/sso/validate", self.credentials.base_url);
        let now = Utc::now();

        let attempts: Vec<Option<String>> = {
            let state = self.state.lock().await;
            let mut modes = Vec::new();
            if let Some(b) = &state.sso_bearer {
                modes.push(Some(b.value.clone()));
            }
            if let Some(b) = &state.oauth_bearer {
                modes.push(Some(b.value.clone()));
            }
            modes.push(None); // cookies only
            modes
        };

        let mut last_status = None;
        for bearer in attempts.into_iter().take(3) {
            let mut request = self.http.get(&validate_url);
            if let Some(token) = &bearer {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            let status = response.status().as_u16();
            last_status = Some(status);
            if status == 200 {
                let mut state = self.state.lock().await;
                state.validate = AuthStepRecord {
                    step: AuthStep::Validate,
                    status: Some(200),
                    timestamp: Some(now),
                    request_id: None,
                };
                state.last_validate = Some(now);
                drop(state);
                self.audit_step(AuthStep::Validate, Some(200), None, None).await;
                sleep(Duration::from_secs(2)).await;
                return Ok(());
            }
        }

        self.audit_step(AuthStep::Validate, last_status, None, None).await;
        Err(IbkrError::Auth(AuthError {
            step: AuthStep::Validate,
            http_status: last_status,
            req_id: None,
        }))
    }

    /// Step 4: tickle, then `/iserver/auth/ssodh/init`
    /// (`spec.md` §4.1 step 4).
    async fn step4_tickle_then_init(&self) -> Result<(), IbkrError> {
        self.tickle(Utc::now()).await?;

        let init_url = format!("{}/v1/api/iserver/auth/ssodh/init", self.credentials.base_url);
        let body = serde_json::json!({"publish": true, "compete": true});

        for attempt in 0..2 {
            let response = self.http.post(&init_url).json(&body).send().await?;
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();

            if status == 410 {
                let mut state = self.state.lock().await;
                state.reset(Utc::now());
                drop(state);
                self.audit_step(AuthStep::Init, Some(410), None, None).await;
                return Err(IbkrError::SessionGone(SessionGoneError { requires_refresh: true }));
            }

            if (200..300).contains(&status) {
                let now = Utc::now();
                let mut state = self.state.lock().await;
                state.session_ready = true;
                state.last_init = Some(now);
                state.init = AuthStepRecord {
                    step: AuthStep::Init,
                    status: Some(status),
                    timestamp: Some(now),
                    request_id: None,
                };
                drop(state);
                self.audit_step(AuthStep::Init, Some(status), None, None).await;
                return Ok(());
            }

            let is_sso_dh_failure = status == 500 && text.to_lowercase().contains("failed to generate sso dh token");
            if is_sso_dh_failure && attempt == 0 {
                sleep(Duration::from_secs(3)).await;
                self.tickle(Utc::now()).await?;
                continue;
            }

            let snippet: String = text.chars().take(256).collect();
            self.audit_step(AuthStep::Init, Some(status), None, Some(snippet)).await;
            return Err(IbkrError::Auth(AuthError {
                step: AuthStep::Init,
                http_status: Some(status),
                req_id: None,
            }));
        }

        unreachable!("loop always returns within two attempts")
    }

    /// Step 5: best-effort reauthenticate, then auth/status must report
    /// both flags true, with one retry after 3s (`spec.md` §4.1 step 5).
    async fn step5_gateway_establish(&self) -> Result<(), IbkrError> {
        let reauth_url = format!("{}/v1/api/iserver/reauthenticate", self.credentials.base_url);
        let _ = self.http.post(&reauth_url).send().await; // best effort

        if self.gateway_connected().await? {
            return Ok(());
        }
        sleep(Duration::from_secs(3)).await;
        if self.gateway_connected().await? {
            return Ok(());
        }
        Err(IbkrError::Gateway(GatewayError))
    }

    async fn gateway_connected(&self) -> Result<bool, IbkrError> {
        let status_url = format!("{}/v1/api/iserver/auth/status", self.credentials.base_url);
        let response = self.http.post(&status_url).send().await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let authenticated = body.get("authenticated").and_then(Value::as_bool).unwrap_or(false);
        let connected = body.get("connected").and_then(Value::as_bool).unwrap_or(false);
        Ok(authenticated && connected)
    }

    /// Step 6: account selection, if configured (`spec.md` §4.1 step 6).
    async fn step6_account_selection(&self) -> Result<(), IbkrError> {
        let (account_id, already_selected) = {
            let state = self.state.lock().await;
            (self.credentials.account_id.clone(), state.account_selected)
        };

        if let Some(acct_id) = account_id {
            if !already_selected {
                let url = format!("{}/v1/api/iserver/account", self.credentials.base_url);
                let response = self
                    .http
                    .post(&url)
                    .json(&serde_json::json!({"acctId": acct_id}))
                    .send()
                    .await?;
                if response.status().is_success() {
                    let mut state = self.state.lock().await;
                    state.account_selected = true;
                    drop(state);
                    sleep(Duration::from_millis(500)).await;
                }
            }
        }

        let subaccounts_url = format!("{}/v1/api/portfolio/subaccounts", self.credentials.base_url);
        let _ = self.http.get(&subaccounts_url).send().await; // idempotent, ignore failure
        Ok(())
    }

    /// Keep-alive tickle (`spec.md` §4.1 keep-alive rule). On failure the
    /// session is marked not-ready so the next call falls through to a
    /// full `ensure_ready`.
    async fn tickle(&self, now: DateTime<Utc>) -> Result<(), IbkrError> {
        let url = format!("{}/v1/api/tickle", self.credentials.base_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let mut state = self.state.lock().await;
                state.last_init = Some(now);
                Ok(())
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let mut state = self.state.lock().await;
                state.session_ready = false;
                drop(state);
                info!(status, "tickle failed, session marked not ready");
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.session_ready = false;
                drop(state);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_credentials(base_url: String) -> Credentials {
        // A throwaway 2048-bit test key; real deployments load this from
        // the keyring (see keys.rs) or an environment variable.
        const TEST_KEY: &str = include_str!("../tests/fixtures/test_rsa_key.pem");
        Credentials {
            client_id: "client-123".into(),
            client_key_id: "key-1".into(),
            private_key_pem: TEST_KEY.into(),
            credential: "trader1".into(),
            allowed_ip: None,
            account_id: None,
            environment: model::Environment::Paper,
            scope: None,
            base_url,
        }
    }

    #[tokio::test]
    async fn oauth_step_fails_fast_on_non_2xx() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/oauth2/api/v1/token");
            then.status(401).body("invalid_client");
        });

        let credentials = test_credentials(server.base_url());
        let session = IbkrSession::new(credentials, None).expect("client builds");
        let err = session.step1_oauth(Utc::now()).await.unwrap_err();
        match err {
            IbkrError::Auth(e) => assert_eq!(e.http_status, Some(401)),
            other => panic!("expected AuthError, got {other:?}"),
        }
    }

    #[test]
    fn default_scope_is_sso_sessions_write() {
        let credentials = test_credentials("https://example.com".into());
        assert_eq!(credentials.scope_or_default(), "sso-sessions.write");
    }
}
