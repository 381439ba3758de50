//! OAuth token exchange for service accounts (JWT bearer grant).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{AccessToken, ServiceAccountKey};
use crate::MirrorError;

/// Read/write access to spreadsheets plus drive, which `open by key` needs.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_MINS: i64 = 60;

/// Issues access tokens for a service-account key.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, key: &ServiceAccountKey) -> Result<AccessToken, MirrorError>;
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Sign the RS256 assertion the token endpoint expects.
///
/// # Errors
/// Returns [`MirrorError::Credentials`] if the private key is not a valid RSA PEM.
pub fn sign_assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String, MirrorError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SCOPES.join(" "),
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_MINS * 60,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid.clone_from(&key.private_key_id);

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| MirrorError::Credentials(format!("invalid private key: {e}")))?;

    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| MirrorError::Credentials(format!("failed to sign assertion: {e}")))
}

/// Token provider backed by Google's OAuth endpoint
pub struct GoogleTokenProvider {
    client: Client,
}

impl GoogleTokenProvider {
    /// Create with a custom client (timeouts are configured on the client)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenProvider for GoogleTokenProvider {
    async fn fetch_token(&self, key: &ServiceAccountKey) -> Result<AccessToken, MirrorError> {
        let now = Utc::now();
        let assertion = sign_assertion(key, now.timestamp())?;

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| MirrorError::Network(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MirrorError::TokenExchange(format!("status {status}: {text}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MirrorError::TokenExchange(format!("invalid response: {e}")))?;

        let expires_in = body.expires_in.unwrap_or(3600);
        debug!(client_email = %key.client_email, expires_in, "Access token issued");

        Ok(AccessToken::new(
            body.access_token,
            now + Duration::seconds(expires_in),
        ))
    }
}
