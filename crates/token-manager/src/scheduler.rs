//! Background scheduler task
//!
//! Drives the `schedule` state machine for the life of the process: waits
//! for an authorization code, exchanges it, installs the token, and refreshes
//! it ahead of expiry. Provider failures are logged and recovered here; the
//! task only ends when shutdown is signalled.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::manager::{CodeReceiver, TokenManager};
use crate::schedule::{LoopAction, LoopEvent, LoopState, handle_event};
use crate::token::Grant;

/// Spawn the scheduler task.
///
/// Setting the `shutdown` value to `true`, or dropping its sender, stops the
/// task at its next suspension point, including mid-request.
pub fn spawn_scheduler(
    manager: Arc<TokenManager>,
    codes: CodeReceiver,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_scheduler(manager, codes, shutdown))
}

/// Run the scheduler on the current task until shutdown.
pub async fn run_scheduler(
    manager: Arc<TokenManager>,
    mut codes: CodeReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    let policy = manager.policy().clone();
    let mut state = LoopState::AwaitingCode;
    let mut action = LoopAction::Wait;
    info!("waiting for authorization code");

    loop {
        let event = match action {
            LoopAction::Exit => break,
            LoopAction::Wait => wait_for_event(&state, &mut codes, &mut shutdown).await,
            LoopAction::Exchange(code) => {
                info!("exchanging authorization code");
                tokio::select! {
                    result = manager.exchange(code.expose()) => match result {
                        Ok(token) => {
                            let lifetime = token.lifetime();
                            manager.install(token, Grant::AuthorizationCode).await;
                            LoopEvent::Exchanged { lifetime }
                        }
                        Err(e) => {
                            warn!(error = %e, "cannot exchange authorization code, submit a new one");
                            LoopEvent::ExchangeFailed
                        }
                    },
                    _ = shutdown_requested(&mut shutdown) => LoopEvent::Shutdown,
                }
            }
            LoopAction::Refresh => {
                debug!("refreshing token");
                tokio::select! {
                    result = manager.refresh() => match result {
                        Ok(token) => {
                            let lifetime = token.lifetime();
                            manager.install(token, Grant::RefreshToken).await;
                            LoopEvent::Refreshed { lifetime }
                        }
                        Err(e) => {
                            let retryable = e.is_retryable();
                            if retryable {
                                warn!(error = %e, "token refresh failed, backing off");
                            } else {
                                warn!(error = %e, "token can no longer be refreshed, waiting for authorization code");
                            }
                            LoopEvent::RefreshFailed { retryable }
                        }
                    },
                    _ = shutdown_requested(&mut shutdown) => LoopEvent::Shutdown,
                }
            }
        };

        let (next_state, next_action) = handle_event(state, event, &policy, Instant::now());
        log_state(&next_state);
        state = next_state;
        action = next_action;
    }

    info!("token scheduler stopped");
}

/// Block until the current state has something to react to.
async fn wait_for_event(
    state: &LoopState,
    codes: &mut CodeReceiver,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopEvent {
    match state {
        LoopState::Scheduled { refresh_at, .. } => tokio::select! {
            _ = tokio::time::sleep_until(*refresh_at) => LoopEvent::TimerFired,
            code = codes.recv() => code_event(code),
            _ = shutdown_requested(shutdown) => LoopEvent::Shutdown,
        },
        LoopState::Stopped => LoopEvent::Shutdown,
        // Nothing in flight and no timer armed: only a code moves us on
        _ => tokio::select! {
            code = codes.recv() => code_event(code),
            _ = shutdown_requested(shutdown) => LoopEvent::Shutdown,
        },
    }
}

fn code_event(code: Option<common::Secret<String>>) -> LoopEvent {
    match code {
        Some(code) => LoopEvent::CodeReceived(code),
        // Every sender is gone, so no code can ever arrive again
        None => LoopEvent::Shutdown,
    }
}

/// Resolves once shutdown is requested or the sender is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_state(state: &LoopState) {
    match state {
        LoopState::Scheduled {
            refresh_at,
            failures,
        } => {
            let refresh_in = refresh_at.saturating_duration_since(Instant::now());
            info!(
                refresh_in_secs = refresh_in.as_secs(),
                failures, "token refresh scheduled"
            );
        }
        LoopState::AwaitingCode => info!("waiting for authorization code"),
        other => debug!(state = other.label(), "scheduler transition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::Error;
    use crate::manager::ManagerConfig;
    use crate::schedule::RefreshPolicy;
    use crate::testing::MockProvider;
    use crate::token::Credentials;

    struct Harness {
        manager: Arc<TokenManager>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(provider: &MockProvider, policy: RefreshPolicy) -> Harness {
        let (manager, codes) = TokenManager::new(
            ManagerConfig::new(Credentials::new("client-1", "secret-1"))
                .token_url(provider.url.clone())
                .policy(policy),
            reqwest::Client::new(),
        );
        let manager = Arc::new(manager);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = spawn_scheduler(Arc::clone(&manager), codes, shutdown_rx);
        Harness {
            manager,
            shutdown,
            task,
        }
    }

    /// Poll the read path until `predicate` accepts the outcome or 5s pass.
    async fn eventually<F>(manager: &TokenManager, predicate: F)
    where
        F: Fn(&crate::Result<Arc<crate::Token>>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let outcome = manager.current_token().await;
            if predicate(&outcome) {
                return;
            }
            assert!(Instant::now() < deadline, "condition not reached, last read: {outcome:?}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn submitted_code_becomes_current_token() {
        let provider = MockProvider::start(vec![(
            200,
            r#"{"access_token":"AT1","refresh_token":"RT1","token_type":"bearer","expires_in":3600,"host":"h"}"#.into(),
        )])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("abc123").unwrap();
        eventually(&harness.manager, |r| r.is_ok()).await;

        let token = harness.manager.current_token().await.unwrap();
        assert_eq!(token.access_token, "AT1");
        assert_eq!(token.host, "h");
        let remaining = token.remaining(Instant::now());
        assert!(remaining > Duration::from_secs(3590) && remaining <= Duration::from_secs(3600));
        assert_eq!(provider.requests()[0]["code"], "abc123");
    }

    #[tokio::test]
    async fn rejected_exchange_installs_nothing_and_accepts_new_code() {
        let provider = MockProvider::start(vec![
            (400, r#"{"error":"invalid_grant"}"#.into()),
            MockProvider::ok("AT1", "RT1", 3600),
        ])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("stale").unwrap();
        // Wait until the first exchange has been attempted
        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.requests().is_empty() {
            assert!(Instant::now() < deadline, "exchange never attempted");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            harness.manager.current_token().await,
            Err(Error::NoTokenAvailable)
        ));

        // No automatic retry: only a fresh code gets a token
        harness.manager.submit_code("fresh").unwrap();
        eventually(&harness.manager, |r| r.is_ok()).await;
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.requests()[1]["code"], "fresh");
    }

    #[tokio::test]
    async fn token_lapses_when_refresh_keeps_failing() {
        // One token with a 1s lifetime, every refresh rejected
        let provider = MockProvider::start(vec![
            MockProvider::ok("AT1", "RT1", 1),
            (500, "upstream down".into()),
            (500, "upstream down".into()),
        ])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("abc123").unwrap();
        eventually(&harness.manager, |r| r.is_ok()).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(matches!(
            harness.manager.current_token().await,
            Err(Error::TokenExpired)
        ));
        assert!(
            provider
                .requests()
                .iter()
                .any(|r| r["grant_type"] == "refresh_token"),
            "a refresh should have been attempted before expiry"
        );
    }

    #[tokio::test]
    async fn refresh_replaces_token_before_expiry() {
        // 2s lifetime with the default margin refreshes after 1s
        let provider = MockProvider::start(vec![
            MockProvider::ok("AT1", "RT1", 2),
            MockProvider::ok("AT2", "RT2", 3600),
        ])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("abc123").unwrap();
        eventually(&harness.manager, |r| r.is_ok()).await;
        eventually(&harness.manager, |r| {
            matches!(r, Ok(t) if t.access_token == "AT2")
        })
        .await;

        let token = harness.manager.current_token().await.unwrap();
        assert!(token.valid_until() > Instant::now());
        let refresh = provider.requests()[1].clone();
        assert_eq!(refresh["grant_type"], "refresh_token");
        assert_eq!(refresh["refresh_token"], "RT1");
    }

    #[tokio::test]
    async fn failed_refresh_is_retried_with_backoff() {
        let provider = MockProvider::start(vec![
            MockProvider::ok("AT1", "RT1", 3),
            (503, "try later".into()),
            MockProvider::ok("AT2", "RT2", 3600),
        ])
        .await;
        let policy = RefreshPolicy {
            margin: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(200),
            backoff_max: Duration::from_secs(1),
        };
        let harness = start(&provider, policy);

        harness.manager.submit_code("abc123").unwrap();
        eventually(&harness.manager, |r| {
            matches!(r, Ok(t) if t.access_token == "AT2")
        })
        .await;
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_lifetime_does_not_stop_the_scheduler() {
        let provider = MockProvider::start(vec![
            MockProvider::ok("AT1", "RT1", u64::MAX),
            MockProvider::ok("AT2", "RT2", 3600),
        ])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("abc123").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.requests().is_empty() {
            assert!(Instant::now() < deadline, "exchange never sent");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!harness.task.is_finished(), "scheduler task ended");
        assert!(matches!(
            harness.manager.current_token().await,
            Err(Error::NoTokenAvailable)
        ));

        harness.manager.submit_code("retry").unwrap();
        eventually(&harness.manager, |r| {
            matches!(r, Ok(t) if t.access_token == "AT2")
        })
        .await;
    }

    #[tokio::test]
    async fn code_while_scheduled_reauthorizes() {
        let provider = MockProvider::start(vec![
            MockProvider::ok("AT1", "RT1", 3600),
            MockProvider::ok("AT9", "RT9", 3600),
        ])
        .await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.manager.submit_code("first").unwrap();
        eventually(&harness.manager, |r| r.is_ok()).await;

        harness.manager.submit_code("second").unwrap();
        eventually(&harness.manager, |r| {
            matches!(r, Ok(t) if t.access_token == "AT9")
        })
        .await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let provider = MockProvider::start(vec![]).await;
        let harness = start(&provider, RefreshPolicy::default());

        harness.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), harness.task)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        assert!(matches!(
            harness.manager.submit_code("late"),
            Err(Error::SchedulerStopped)
        ));
    }

    #[tokio::test]
    async fn dropping_shutdown_sender_stops_the_task() {
        let provider = MockProvider::start(vec![]).await;
        let Harness { shutdown, task, .. } = start(&provider, RefreshPolicy::default());

        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
