//! Provider endpoint and timing defaults
//!
//! Everything here can be overridden through the daemon's configuration;
//! these are the values used when nothing is configured.

use std::time::Duration;

/// Wrike's OAuth2 token endpoint, used for both code exchange and refresh.
pub const DEFAULT_TOKEN_URL: &str = "https://login.wrike.com/oauth2/token";

/// Upper bound on a whole token endpoint round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on establishing the TCP/TLS connection to the provider.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long before `valid_until` the scheduler refreshes.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// First retry delay after a failed refresh.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Retry delays after failed refreshes never exceed this.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Capacity of the authorization code slot.
pub const CODE_SLOT_CAPACITY: usize = 1;

/// Longest `expires_in` accepted from the provider. Anything above is an
/// invalid token response.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);
