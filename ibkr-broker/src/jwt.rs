use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

/// Claims for the step-1 OAuth client-credentials JWT
/// (`spec.md` §4.1 step 1).
#[derive(Debug, Serialize)]
struct OauthClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    jti: String,
    iat: i64,
    exp: i64,
}

/// Claims for the step-2 SSO-session JWT (`spec.md` §4.1 step 2).
#[derive(Debug, Serialize)]
struct SsoClaims<'a> {
    credential: &'a str,
    iss: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<&'a str>,
}

fn encoding_key(private_key_pem: &str) -> Result<EncodingKey, jsonwebtoken::errors::Error> {
    EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
}

fn header(kid: &str) -> Header {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    header
}

/// Sign the 60-second OAuth client-credentials JWT described in
/// `spec.md` §4.1 step 1.
pub fn sign_oauth_jwt(
    client_id: &str,
    client_key_id: &str,
    token_url: &str,
    private_key_pem: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = OauthClaims {
        iss: client_id,
        sub: client_id,
        aud: token_url,
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + 60,
    };
    encode(&header(client_key_id), &claims, &encoding_key(private_key_pem)?)
}

/// Sign the 24-hour SSO-session JWT described in `spec.md` §4.1 step 2.
pub fn sign_sso_jwt(
    credential: &str,
    client_id: &str,
    client_key_id: &str,
    allowed_ip: Option<&str>,
    private_key_pem: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = SsoClaims {
        credential,
        iss: client_id,
        iat: now,
        exp: now + 86_400,
        ip: allowed_ip,
    };
    encode(&header(client_key_id), &claims, &encoding_key(private_key_pem)?)
}
