//! OAuth token model and token endpoint client
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (first token pair)
//! 2. Token refresh (every later token pair)
//!
//! Both POST a form to the same endpoint with different grant types. Neither
//! touches the manager's current token; installing a result is the
//! scheduler's job.

use std::fmt;
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::constants::MAX_TOKEN_LIFETIME;
use crate::error::{Error, Result};

/// OAuth client identity presented on every token endpoint call.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
        }
    }
}

/// Grant type sent to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub fn as_str(self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
        }
    }

    /// Error for a rejected or unreadable response under this grant.
    fn failure(self, message: String) -> Error {
        match self {
            Grant::AuthorizationCode => Error::ExchangeFailed(message),
            Grant::RefreshToken => Error::RefreshFailed(message),
        }
    }
}

/// Successful token endpoint payload.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub host: String,
}

/// One issued credential. Immutable once built; replacing the current token
/// always means installing a new `Token`.
///
/// Serializes to the provider's wire shape. `valid_until` stays local.
#[derive(Clone, Serialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub host: String,
    #[serde(skip)]
    valid_until: Instant,
}

impl Token {
    /// Build a token from a provider response received at `issued_at`.
    ///
    /// Lifetimes above `MAX_TOKEN_LIFETIME` are capped there.
    pub fn issued(response: TokenResponse, issued_at: Instant) -> Self {
        let lifetime = Duration::from_secs(response.expires_in).min(MAX_TOKEN_LIFETIME);
        let valid_until = issued_at + lifetime;
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            host: response.host,
            valid_until,
        }
    }

    /// Lifetime the provider granted at issuance, capped at `MAX_TOKEN_LIFETIME`.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in).min(MAX_TOKEN_LIFETIME)
    }

    pub fn valid_until(&self) -> Instant {
        self.valid_until
    }

    /// A token is still usable at the exact instant it expires.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now <= self.valid_until
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.valid_until.saturating_duration_since(now)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("host", &self.host)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Exchange an authorization code for the first token pair.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &Credentials,
    code: &str,
) -> Result<Token> {
    request_token(
        client,
        token_url,
        credentials,
        Grant::AuthorizationCode,
        ("code", code),
    )
    .await
}

/// Trade a refresh token for a new token pair.
pub async fn refresh_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &Credentials,
    refresh: &str,
) -> Result<Token> {
    request_token(
        client,
        token_url,
        credentials,
        Grant::RefreshToken,
        ("refresh_token", refresh),
    )
    .await
}

async fn request_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &Credentials,
    grant: Grant,
    grant_field: (&str, &str),
) -> Result<Token> {
    let started = Instant::now();
    let outcome = post_token_form(client, token_url, credentials, grant, grant_field).await;

    let label = match &outcome {
        Ok(_) => "success",
        Err(Error::TransportFailed(_)) => "transport_error",
        Err(_) => "rejected",
    };
    metrics::counter!("token_requests_total", "grant_type" => grant.as_str(), "outcome" => label)
        .increment(1);
    metrics::histogram!("token_request_duration_seconds", "grant_type" => grant.as_str())
        .record(started.elapsed().as_secs_f64());

    outcome
}

async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &Credentials,
    grant: Grant,
    (grant_key, grant_value): (&str, &str),
) -> Result<Token> {
    let response = client
        .post(token_url)
        .form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose().as_str()),
            ("grant_type", grant.as_str()),
            (grant_key, grant_value),
        ])
        .send()
        .await
        .map_err(|e| Error::TransportFailed(format!("{} request failed: {e}", grant.as_str())))?;

    let status = response.status();
    info!(grant_type = grant.as_str(), %status, "token endpoint responded");

    if status != reqwest::StatusCode::OK {
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "cannot read token endpoint response body");
                String::from("<no body>")
            }
        };
        warn!(grant_type = grant.as_str(), %status, body = %body, "token endpoint rejected request");
        return Err(grant.failure(format!("token endpoint returned {status}: {body}")));
    }

    let payload = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| grant.failure(format!("invalid token response: {e}")))?;

    if payload.expires_in > MAX_TOKEN_LIFETIME.as_secs() {
        warn!(
            grant_type = grant.as_str(),
            expires_in = payload.expires_in,
            "token endpoint returned an out of range lifetime"
        );
        return Err(grant.failure(format!(
            "invalid token response: expires_in {} out of range",
            payload.expires_in
        )));
    }

    Ok(Token::issued(payload, Instant::now()))
}
