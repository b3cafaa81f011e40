//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! clap already folds env vars into the CLI layer, so loading is: read the
//! optional TOML file, overlay whatever the command line resolved, validate.
//!
//! The client secret is never read from the TOML directly. It comes from
//! `--client-secret` / `WRIKED_CLIENT_SECRET` or from `client_secret_file`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use token_manager::{Credentials, DEFAULT_TOKEN_URL, ManagerConfig, RefreshPolicy};

use crate::cli::Cli;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub provider: ProviderConfig,
    pub refresh: RefreshConfig,
    pub http: HttpConfig,
}

/// OAuth client identity
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// File holding the client secret (alternative to the CLI flag / env var)
    pub client_secret_file: Option<PathBuf>,
}

/// Token endpoint settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub token_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            timeout_secs: token_manager::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            connect_timeout_secs: token_manager::DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

/// Refresh timer and retry settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub margin_secs: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        let policy = RefreshPolicy::default();
        Self {
            margin_secs: policy.margin.as_secs(),
            backoff_initial_secs: policy.backoff_initial.as_secs(),
            backoff_max_secs: policy.backoff_max.as_secs(),
        }
    }
}

/// Local HTTP surface settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: Option<u16>,
    pub bind: IpAddr,
    pub max_connections: usize,
    /// Extra read attempts `/get` makes while no valid token exists
    pub read_retries: u32,
    pub read_retry_interval_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_connections: 256,
            read_retries: 3,
            read_retry_interval_secs: 3,
        }
    }
}

impl Config {
    /// Build the effective configuration from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> common::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.resolve_secret()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Unset keys keep their defaults.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overlay values the command line (or its env vars) provided.
    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(id) = &cli.client_id {
            self.credentials.client_id = Some(id.clone());
        }
        if let Some(secret) = &cli.client_secret {
            self.credentials.client_secret = Some(Secret::new(secret.clone()));
        }
        if let Some(url) = &cli.token_url {
            self.provider.token_url = url.clone();
        }
        let http = cli.http_args();
        if let Some(port) = http.port {
            self.http.port = Some(port);
        }
        if let Some(bind) = http.bind {
            self.http.bind = bind;
        }
    }

    /// Read `client_secret_file` unless a secret was already given.
    fn resolve_secret(&mut self) -> common::Result<()> {
        if self.credentials.client_secret.is_some() {
            return Ok(());
        }
        if let Some(ref secret_file) = self.credentials.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                self.credentials.client_secret = Some(Secret::new(secret));
            }
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        match &self.credentials.client_id {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err(common::Error::missing("client_id")),
        }
        match &self.credentials.client_secret {
            Some(secret) if !secret.is_empty() => {}
            _ => return Err(common::Error::missing("client_secret")),
        }
        match self.http.port {
            None => return Err(common::Error::missing("port")),
            Some(0) => {
                return Err(common::Error::Config(
                    "port must be a positive integer".into(),
                ));
            }
            Some(_) => {}
        }

        if !self.provider.token_url.starts_with("http://")
            && !self.provider.token_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token_url must start with http:// or https://, got: {}",
                self.provider.token_url
            )));
        }
        if self.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.http.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.refresh.backoff_initial_secs == 0
            || self.refresh.backoff_max_secs < self.refresh.backoff_initial_secs
        {
            return Err(common::Error::Config(
                "backoff_initial_secs must be > 0 and <= backoff_max_secs".into(),
            ));
        }
        Ok(())
    }

    /// Socket address for the HTTP server. Only meaningful after validation.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.bind, self.http.port.unwrap_or_default())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.connect_timeout_secs)
    }

    pub fn read_retry_interval(&self) -> Duration {
        Duration::from_secs(self.http.read_retry_interval_secs)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            margin: Duration::from_secs(self.refresh.margin_secs),
            backoff_initial: Duration::from_secs(self.refresh.backoff_initial_secs),
            backoff_max: Duration::from_secs(self.refresh.backoff_max_secs),
        }
    }

    /// Settings for the token manager. Only meaningful after validation.
    pub fn manager_config(&self) -> ManagerConfig {
        let credentials = Credentials {
            client_id: self.credentials.client_id.clone().unwrap_or_default(),
            client_secret: self
                .credentials
                .client_secret
                .clone()
                .unwrap_or_else(|| Secret::new(String::new())),
        };
        ManagerConfig::new(credentials)
            .token_url(self.provider.token_url.clone())
            .policy(self.refresh_policy())
    }
}
