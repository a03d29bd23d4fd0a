//! Google service-account OAuth.
//!
//! Signs a short-lived RS256 JWT with the service-account private key and
//! exchanges it for an access token at the account's token endpoint. Tokens
//! are cached until shortly before expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::secrets::GoogleServiceAccount;
use crate::{Error, Result};

/// Scopes requested for the notifier: read-only sheets plus calendar writes.
pub const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets.readonly https://www.googleapis.com/auth/calendar";

const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Access-token provider for the Google APIs.
pub struct GoogleAuth {
    http: reqwest::Client,
    account: GoogleServiceAccount,
    scope: &'static str,
    token: RwLock<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn new(http: reqwest::Client, account: GoogleServiceAccount) -> Self {
        Self {
            http,
            account,
            scope: SCOPES,
            token: RwLock::new(None),
        }
    }

    /// Return a valid access token, fetching a fresh one when needed.
    pub async fn access_token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if !token_expired(token.expires_at, Utc::now()) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let now = Utc::now();
        let assertion = self.signed_assertion(now)?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http
            .post(&self.account.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SourceUnavailable(format!(
                "Token exchange failed ({}): {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("Invalid token response: {}", e)))?;

        let lifetime = token_response.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        let expires_at = now + Duration::seconds(lifetime);
        debug!(expires_at = %expires_at, "Google access token refreshed");

        let access_token = token_response.access_token.clone();
        {
            let mut cached = self.token.write().await;
            *cached = Some(CachedToken {
                access_token: token_response.access_token,
                expires_at,
            });
        }

        Ok(access_token)
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid service-account key: {}", e)))?;

        let claims = claims(&self.account, self.scope, now);

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| Error::Config(format!("Failed to sign assertion: {}", e)))
    }
}

fn claims<'a>(
    account: &'a GoogleServiceAccount,
    scope: &'a str,
    now: DateTime<Utc>,
) -> Claims<'a> {
    Claims {
        iss: &account.client_email,
        scope,
        aud: &account.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + TOKEN_LIFETIME_SECS,
    }
}

fn token_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) <= now
}
