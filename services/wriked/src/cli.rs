//! Command-line interface
//!
//! Every flag can also come from the environment; clap resolves that layer.
//! Anything left unset falls back to the config file, then to defaults.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Keeps a Wrike OAuth access token fresh for local clients
#[derive(Parser, Debug)]
#[command(name = "wriked", version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "WRIKED_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Wrike app client ID
    #[arg(short = 'I', long, env = "WRIKED_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// Wrike app client secret
    #[arg(
        short = 'S',
        long,
        env = "WRIKED_CLIENT_SECRET",
        global = true,
        hide_env_values = true
    )]
    pub client_secret: Option<String>,

    /// OAuth token endpoint
    #[arg(long, env = "WRIKED_TOKEN_URL", global = true)]
    pub token_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the token and the code intake over HTTP
    Http(HttpArgs),
}

#[derive(Args, Debug, Default)]
pub struct HttpArgs {
    /// Port for the HTTP server
    #[arg(short = 'P', long, env = "WRIKED_PORT")]
    pub port: Option<u16>,

    /// Address to bind (defaults to loopback)
    #[arg(long, env = "WRIKED_BIND")]
    pub bind: Option<IpAddr>,
}

impl Cli {
    pub fn http_args(&self) -> &HttpArgs {
        match &self.command {
            Command::Http(args) => args,
        }
    }
}
