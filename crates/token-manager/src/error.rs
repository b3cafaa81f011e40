//! Error taxonomy for token lifecycle operations

/// Errors from reading, exchanging, or refreshing the managed token.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no token available: no authorization code has been exchanged yet")]
    NoTokenAvailable,

    #[error("token expired and has not been refreshed yet")]
    TokenExpired,

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("token endpoint unreachable: {0}")]
    TransportFailed(String),

    #[error("an authorization code is already waiting to be exchanged")]
    CodePending,

    #[error("token scheduler is not running")]
    SchedulerStopped,
}

impl Error {
    /// Whether a failed refresh is worth retrying with the same refresh token.
    ///
    /// A missing or expired token leaves nothing to refresh with; only a new
    /// authorization code can recover from those.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExchangeFailed(_) | Error::RefreshFailed(_) | Error::TransportFailed(_)
        )
    }

    /// Stable snake_case label, used as the `type` of JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoTokenAvailable => "no_token_available",
            Error::TokenExpired => "token_expired",
            Error::ExchangeFailed(_) => "exchange_failed",
            Error::RefreshFailed(_) => "refresh_failed",
            Error::TransportFailed(_) => "transport_failed",
            Error::CodePending => "code_pending",
            Error::SchedulerStopped => "scheduler_stopped",
        }
    }
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failures_are_retryable() {
        assert!(Error::RefreshFailed("400".into()).is_retryable());
        assert!(Error::TransportFailed("timeout".into()).is_retryable());
        assert!(Error::ExchangeFailed("500".into()).is_retryable());
    }

    #[test]
    fn read_failures_are_not_retryable() {
        assert!(!Error::NoTokenAvailable.is_retryable());
        assert!(!Error::TokenExpired.is_retryable());
        assert!(!Error::SchedulerStopped.is_retryable());
    }

    #[test]
    fn kinds_are_snake_case_labels() {
        assert_eq!(Error::NoTokenAvailable.kind(), "no_token_available");
        assert_eq!(Error::TokenExpired.kind(), "token_expired");
        assert_eq!(Error::CodePending.kind(), "code_pending");
    }

    #[test]
    fn display_carries_provider_detail() {
        let err = Error::ExchangeFailed("token endpoint returned 400 Bad Request".into());
        assert!(err.to_string().contains("400 Bad Request"));
    }
}
