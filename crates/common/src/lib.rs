//! Types shared by the token manager and the `wriked` daemon

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
