//! OAuth2 token lifecycle manager
//!
//! Keeps one continuously valid access token for a local daemon. Other local
//! clients read it instead of running the OAuth flow themselves.
//!
//! Token flow:
//! 1. An authorization code arrives out of band via `TokenManager::submit_code()`
//! 2. The scheduler task exchanges it with `token::exchange_code()`
//! 3. The resulting `Token` is installed as current
//! 4. A timer fires ahead of expiry and `token::refresh_token()` replaces it
//! 5. Readers call `TokenManager::current_token()` at any time
//!
//! The scheduler (`scheduler::spawn_scheduler`) is the only writer. Its
//! transitions live in `schedule` as a pure function so they can be tested
//! without a network.

pub mod constants;
pub mod error;
pub mod manager;
pub mod schedule;
pub mod scheduler;
pub mod token;

#[cfg(test)]
mod testing;

pub use constants::*;
pub use error::{Error, Result};
pub use manager::{CodeReceiver, ManagerConfig, TokenManager, TokenStatus};
pub use schedule::RefreshPolicy;
pub use scheduler::{run_scheduler, spawn_scheduler};
pub use token::{Credentials, Grant, Token, TokenResponse, exchange_code, refresh_token};
