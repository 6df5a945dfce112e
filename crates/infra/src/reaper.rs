use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use warden_auth::{AuthService, AuthStore, ReapReport};
use warden_core::{DomainError, DomainResult};

/// Handle to control and join the background reaper.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<ReapReport>>,
}

impl ReaperHandle {
    /// Request graceful shutdown and wait for the reaper to stop.
    ///
    /// Returns the totals purged over the reaper's lifetime. A reaper task
    /// that panicked is logged and reports nothing.
    pub async fn shutdown(mut self) -> ReapReport {
        let _ = self.shutdown.send(true);
        let Some(join) = self.join.take() else {
            return ReapReport::default();
        };
        match join.await {
            Ok(total) => total,
            Err(err) => {
                error!(error = %err, "session reaper task failed");
                ReapReport::default()
            }
        }
    }
}

/// Periodic purge of expired sessions and tokens.
///
/// Lazy deletion only removes rows somebody presents again; the reaper catches
/// the rest. A failed pass is logged and retried on the next tick.
#[derive(Debug)]
pub struct SessionReaper;

impl SessionReaper {
    /// Spawn the reaper on the current tokio runtime.
    ///
    /// The first pass runs immediately, then once per `interval`. A zero
    /// interval is rejected.
    pub fn spawn<S>(service: AuthService<S>, interval: Duration) -> DomainResult<ReaperHandle>
    where
        S: AuthStore + 'static,
    {
        if interval.is_zero() {
            return Err(DomainError::validation("reap interval must be non-zero"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(reaper_loop(service, interval, shutdown_rx));

        Ok(ReaperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

async fn reaper_loop<S>(
    service: AuthService<S>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ReapReport
where
    S: AuthStore + 'static,
{
    info!(interval_secs = interval.as_secs(), "session reaper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total = ReapReport::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.reap_expired().await {
                    Ok(report) => {
                        total.sessions += report.sessions;
                        total.tokens += report.tokens;
                        debug!(
                            sessions = report.sessions,
                            tokens = report.tokens,
                            "reaper pass finished"
                        );
                    }
                    Err(err) => {
                        warn!(error = %err, retryable = err.is_retryable(), "reaper pass failed");
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(sessions = total.sessions, tokens = total.tokens, "session reaper stopped");
    total
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use warden_auth::{AuthConfig, NewUser, PasswordCost};
    use warden_core::{Clock, ManualClock};

    use super::*;
    use crate::InMemoryAuthStore;

    #[tokio::test]
    async fn reaper_purges_expired_rows_until_shutdown() {
        let store = Arc::new(InMemoryAuthStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = AuthConfig::default().with_password_cost(PasswordCost::minimal());
        let service =
            AuthService::with_clock(store.clone(), clock.clone() as Arc<dyn Clock>, config);

        let alice = service
            .register_user(NewUser::new("alice@x.com", "alice", "correct horse"))
            .await
            .unwrap();
        service.login("alice@x.com", "correct horse").await.unwrap();
        service.issue_token(alice.id).await.unwrap();
        clock.advance(chrono::Duration::days(1));

        let handle = SessionReaper::spawn(service, Duration::from_millis(10)).unwrap();
        for _ in 0..100 {
            if store.session_count() == 0 && store.token_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let total = handle.shutdown().await;
        assert_eq!(total, ReapReport { sessions: 1, tokens: 1 });
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let store = Arc::new(InMemoryAuthStore::new());
        let service = AuthService::new(store, AuthConfig::default());

        let err = SessionReaper::spawn(service, Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), warden_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn panicked_reaper_task_reports_nothing() {
        let (shutdown, _rx) = watch::channel(false);
        let crashed: JoinHandle<ReapReport> = tokio::spawn(async { panic!("reaper crashed") });
        let handle = ReaperHandle {
            shutdown,
            join: Some(crashed),
        };
        assert_eq!(handle.shutdown().await, ReapReport::default());
    }
}
