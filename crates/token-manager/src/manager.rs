//! Token manager: the single owner of the current token
//!
//! Holds the client credentials, the authorization code slot, and the current
//! token behind a `RwLock`. Any number of callers may read concurrently; the
//! scheduler task is the only writer.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::constants::{CODE_SLOT_CAPACITY, DEFAULT_TOKEN_URL};
use crate::error::{Error, Result};
use crate::schedule::RefreshPolicy;
use crate::token::{self, Credentials, Grant, Token};

/// Receiving end of the authorization code slot, consumed by the scheduler.
pub type CodeReceiver = mpsc::Receiver<Secret<String>>;

/// Snapshot of token availability, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No code has been exchanged yet
    Missing,
    Ready { remaining: Duration },
    /// Lapsed and not refreshed yet
    Expired,
}

impl TokenStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TokenStatus::Missing => "awaiting_code",
            TokenStatus::Ready { .. } => "ready",
            TokenStatus::Expired => "expired",
        }
    }
}

/// Builder-style settings for a `TokenManager`.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub credentials: Credentials,
    pub token_url: String,
    pub policy: RefreshPolicy,
}

impl ManagerConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            policy: RefreshPolicy::default(),
        }
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Process-wide token owner. Construct once and share through `Arc`.
pub struct TokenManager {
    credentials: Credentials,
    token_url: String,
    policy: RefreshPolicy,
    http_client: reqwest::Client,
    codes: mpsc::Sender<Secret<String>>,
    current: RwLock<Option<Arc<Token>>>,
}

impl TokenManager {
    /// Create an empty manager and the code receiver its scheduler consumes.
    ///
    /// `http_client` should carry the request timeout; the manager adds none
    /// of its own.
    pub fn new(config: ManagerConfig, http_client: reqwest::Client) -> (Self, CodeReceiver) {
        let (codes, receiver) = mpsc::channel(CODE_SLOT_CAPACITY);
        info!(
            client_id = %config.credentials.client_id,
            token_url = %config.token_url,
            "token manager initialized"
        );
        let manager = Self {
            credentials: config.credentials,
            token_url: config.token_url,
            policy: config.policy,
            http_client,
            codes,
            current: RwLock::new(None),
        };
        (manager, receiver)
    }

    /// Hand an authorization code to the scheduler.
    ///
    /// Never blocks. Fails with `CodePending` while a previous code is still
    /// waiting in the slot, and with `SchedulerStopped` once the scheduler is
    /// gone.
    pub fn submit_code(&self, code: impl Into<String>) -> Result<()> {
        match self.codes.try_send(Secret::new(code.into())) {
            Ok(()) => {
                info!("authorization code queued for exchange");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::CodePending),
            Err(TrySendError::Closed(_)) => Err(Error::SchedulerStopped),
        }
    }

    /// Current token, if one has been obtained and has not lapsed.
    pub async fn current_token(&self) -> Result<Arc<Token>> {
        let current = self.current.read().await;
        match current.as_ref() {
            None => Err(Error::NoTokenAvailable),
            Some(token) if !token.is_valid_at(Instant::now()) => Err(Error::TokenExpired),
            Some(token) => Ok(Arc::clone(token)),
        }
    }

    pub async fn status(&self) -> TokenStatus {
        match self.current_token().await {
            Ok(token) => TokenStatus::Ready {
                remaining: token.remaining(Instant::now()),
            },
            Err(Error::TokenExpired) => TokenStatus::Expired,
            Err(_) => TokenStatus::Missing,
        }
    }

    /// Exchange an authorization code. Does not install the result.
    pub async fn exchange(&self, code: &str) -> Result<Token> {
        token::exchange_code(&self.http_client, &self.token_url, &self.credentials, code).await
    }

    /// Refresh the current token. Does not install the result.
    ///
    /// Goes through the read contract, so a missing or lapsed token fails
    /// with `NoTokenAvailable` / `TokenExpired` before any request is sent.
    pub async fn refresh(&self) -> Result<Token> {
        let current = self.current_token().await?;
        token::refresh_token(
            &self.http_client,
            &self.token_url,
            &self.credentials,
            &current.refresh_token,
        )
        .await
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Replace the current token. Only the scheduler calls this.
    pub(crate) async fn install(&self, token: Token, grant: Grant) -> Arc<Token> {
        let token = Arc::new(token);
        {
            let mut current = self.current.write().await;
            *current = Some(Arc::clone(&token));
        }
        metrics::counter!("token_installs_total", "grant_type" => grant.as_str()).increment(1);
        info!(
            grant_type = grant.as_str(),
            expires_in = token.expires_in,
            "token installed"
        );
        debug!(token_type = %token.token_type, host = %token.host, "installed token details");
        token
    }
}
