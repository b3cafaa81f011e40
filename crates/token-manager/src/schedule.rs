//! Token lifecycle state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The scheduler task (`scheduler.rs`) performs the I/O each action names and
//! feeds the outcome back in as the next event.
//!
//! ```text
//! AwaitingCode --code--> Exchanging --ok--> Scheduled --timer--> Refreshing
//!      ^                     |                 ^   |                 |
//!      +------failed---------+                 |   +--code--> Exchanging
//!      |                                       +--ok / retryable failure
//!      +------------- token unusable ------------------------------+
//! ```

use std::time::Duration;

use common::Secret;
use tokio::time::Instant;

use crate::constants::{
    DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX, DEFAULT_REFRESH_MARGIN, MAX_TOKEN_LIFETIME,
};

/// Timer and retry tuning for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh this long before the token expires.
    pub margin: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            margin: DEFAULT_REFRESH_MARGIN,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RefreshPolicy {
    /// Delay between installing a token of `lifetime` and refreshing it.
    ///
    /// Lifetimes too short to leave room for the margin are refreshed halfway.
    pub fn refresh_delay(&self, lifetime: Duration) -> Duration {
        match self.margin.checked_mul(2) {
            Some(room) if lifetime > room => lifetime - self.margin,
            _ => lifetime / 2,
        }
    }

    /// Delay before retrying after `failures` consecutive failed refreshes.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.backoff_initial
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Where to go back to if a re-authorization exchange fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    pub refresh_at: Instant,
    pub failures: u32,
}

/// Scheduler states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// No usable token; waiting for an authorization code
    AwaitingCode,
    /// Code exchange in flight. `resume` is set when a token was already held.
    Exchanging { resume: Option<Resume> },
    /// Token installed; refresh timer armed
    Scheduled { refresh_at: Instant, failures: u32 },
    /// Refresh request in flight
    Refreshing { failures: u32 },
    /// Terminal state
    Stopped,
}

impl LoopState {
    /// Label for logs and health output.
    pub fn label(&self) -> &'static str {
        match self {
            LoopState::AwaitingCode => "awaiting_code",
            LoopState::Exchanging { .. } => "exchanging",
            LoopState::Scheduled { .. } => "scheduled",
            LoopState::Refreshing { .. } => "refreshing",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum LoopEvent {
    /// An authorization code arrived through the intake slot
    CodeReceived(Secret<String>),
    /// Code exchange succeeded and the token was installed
    Exchanged { lifetime: Duration },
    /// Code exchange failed; nothing was installed
    ExchangeFailed,
    /// Refresh timer elapsed
    TimerFired,
    /// Refresh succeeded and the token was installed
    Refreshed { lifetime: Duration },
    /// Refresh failed. Not retryable when no usable refresh token is left.
    RefreshFailed { retryable: bool },
    /// Shutdown requested
    Shutdown,
}

/// Actions the scheduler should execute after a transition.
#[derive(Debug)]
pub enum LoopAction {
    /// Exchange this authorization code
    Exchange(Secret<String>),
    /// Refresh the current token
    Refresh,
    /// Nothing to run; wait for the next event the current state listens to
    Wait,
    /// Stop the scheduler
    Exit,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(
    state: LoopState,
    event: LoopEvent,
    policy: &RefreshPolicy,
    now: Instant,
) -> (LoopState, LoopAction) {
    match (state, event) {
        (_, LoopEvent::Shutdown) | (LoopState::Stopped, _) => {
            (LoopState::Stopped, LoopAction::Exit)
        }

        // --- a code starts an exchange while no request is in flight ---
        (LoopState::AwaitingCode, LoopEvent::CodeReceived(code)) => (
            LoopState::Exchanging { resume: None },
            LoopAction::Exchange(code),
        ),
        (
            LoopState::Scheduled {
                refresh_at,
                failures,
            },
            LoopEvent::CodeReceived(code),
        ) => (
            LoopState::Exchanging {
                resume: Some(Resume {
                    refresh_at,
                    failures,
                }),
            },
            LoopAction::Exchange(code),
        ),

        // --- token installed ---
        (
            LoopState::Exchanging { .. } | LoopState::Refreshing { .. },
            LoopEvent::Exchanged { lifetime } | LoopEvent::Refreshed { lifetime },
        ) => (
            LoopState::Scheduled {
                refresh_at: deadline(now, policy.refresh_delay(lifetime)),
                failures: 0,
            },
            LoopAction::Wait,
        ),

        // --- Exchanging ---
        (LoopState::Exchanging { resume: None }, LoopEvent::ExchangeFailed) => {
            (LoopState::AwaitingCode, LoopAction::Wait)
        }
        (LoopState::Exchanging { resume: Some(resume) }, LoopEvent::ExchangeFailed) => (
            LoopState::Scheduled {
                refresh_at: resume.refresh_at,
                failures: resume.failures,
            },
            LoopAction::Wait,
        ),

        // --- Scheduled ---
        (LoopState::Scheduled { failures, .. }, LoopEvent::TimerFired) => {
            (LoopState::Refreshing { failures }, LoopAction::Refresh)
        }

        // --- Refreshing ---
        (LoopState::Refreshing { failures }, LoopEvent::RefreshFailed { retryable: true }) => (
            LoopState::Scheduled {
                refresh_at: deadline(now, policy.backoff(failures)),
                failures: failures.saturating_add(1),
            },
            LoopAction::Wait,
        ),
        (LoopState::Refreshing { .. }, LoopEvent::RefreshFailed { retryable: false }) => {
            (LoopState::AwaitingCode, LoopAction::Wait)
        }

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, LoopAction::Wait),
    }
}

/// `now + delay`, with the delay capped so the timer can always be armed.
fn deadline(now: Instant, delay: Duration) -> Instant {
    now + delay.min(MAX_TOKEN_LIFETIME)
}
