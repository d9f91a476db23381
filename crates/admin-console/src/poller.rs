//! Bounded-retry polling of job progress.
//!
//! The [`Poller`] repeatedly invokes a caller-supplied status fetch until the
//! returned counters describe a terminal job, the attempt budget runs out, or
//! the owning view is torn down. It never mutates state itself; callers do
//! that inside the fetch.

use crate::scope::ViewScope;
use campaign_core::config::PollingConfig;
use campaign_core::types::{DeliveryOutcome, ProgressSnapshot};
use campaign_core::ConsoleResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a poll run currently is. Each run walks
/// `Fetching → (Scheduled → Fetching)* → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Fetching { attempt: u32 },
    Scheduled { next_attempt: u32 },
    Done(Option<DeliveryOutcome>),
}

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    max_attempts: u32,
    interval: Duration,
}

impl Poller {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(config.max_attempts, config.interval())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Returns `Ok(Some(outcome))` once `total > 0` and nothing is queued or
    /// processing, `Ok(None)` when the attempt budget is exhausted or the
    /// scope ends, and the fetch's error if any single fetch fails.
    pub async fn poll_until_done<F, Fut>(
        &self,
        job_id: &str,
        scope: &ViewScope,
        mut fetch: F,
    ) -> ConsoleResult<Option<DeliveryOutcome>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConsoleResult<ProgressSnapshot>>,
    {
        if self.max_attempts == 0 {
            return Ok(None);
        }

        let mut phase = PollPhase::Fetching { attempt: 1 };
        loop {
            phase = match phase {
                PollPhase::Fetching { attempt } => {
                    metrics::counter!("console.poll.attempts").increment(1);
                    let snapshot = fetch().await?;
                    if !scope.is_alive() {
                        PollPhase::Done(None)
                    } else if let Some(outcome) = snapshot.outcome() {
                        info!(job_id, attempt, outcome = ?outcome, "Job reached terminal state");
                        PollPhase::Done(Some(outcome))
                    } else if attempt >= self.max_attempts {
                        warn!(job_id, attempts = attempt, "Poll budget exhausted, giving up");
                        metrics::counter!("console.poll.exhausted").increment(1);
                        PollPhase::Done(None)
                    } else {
                        debug!(
                            job_id,
                            attempt,
                            queued = snapshot.queued_count,
                            processing = snapshot.processing_count,
                            total = snapshot.total_count,
                            "Job still in flight"
                        );
                        PollPhase::Scheduled {
                            next_attempt: attempt + 1,
                        }
                    }
                }
                PollPhase::Scheduled { next_attempt } => {
                    if scope.sleep(self.interval).await {
                        PollPhase::Fetching {
                            attempt: next_attempt,
                        }
                    } else {
                        PollPhase::Done(None)
                    }
                }
                PollPhase::Done(outcome) => return Ok(outcome),
            };
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use campaign_core::ConsoleError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counters(queued: u64, processing: u64, failed: u64, total: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            queued_count: queued,
            processing_count: processing,
            failed_count: failed,
            total_count: total,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_sent() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let outcome = poller
            .poll_until_done("c-1", &scope, || async { Ok(counters(0, 0, 0, 10)) })
            .await
            .unwrap();
        assert_eq!(outcome, Some(DeliveryOutcome::Sent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_failed_when_any_recipient_failed() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let outcome = poller
            .poll_until_done("c-1", &scope, || async { Ok(counters(0, 0, 1, 10)) })
            .await
            .unwrap();
        assert_eq!(outcome, Some(DeliveryOutcome::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_total_exhausts_budget() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let started = tokio::time::Instant::now();

        let outcome = poller
            .poll_until_done("c-1", &scope, move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(counters(0, 0, 0, 0)) }
            })
            .await
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(calls.load(Ordering::SeqCst), 40);
        // 39 waits between 40 fetches
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(39 * 3000));
        assert!(elapsed < Duration::from_millis(40 * 3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progresses_then_completes() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let outcome = poller
            .poll_until_done("c-1", &scope, move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(match n {
                        0 => counters(10, 0, 0, 10),
                        1 => counters(4, 6, 0, 10),
                        _ => counters(0, 0, 0, 10),
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, Some(DeliveryOutcome::Sent));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_ends_poll() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result = poller
            .poll_until_done("c-1", &scope, move || {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 1 {
                        Err(ConsoleError::Gateway("connection reset".into()))
                    } else {
                        Ok(counters(5, 5, 0, 10))
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(ConsoleError::Gateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_waiting() {
        let poller = Poller::new(40, Duration::from_millis(3000));
        let scope = ViewScope::new("test");
        let inner = scope.clone();
        let handle = tokio::spawn(async move {
            poller
                .poll_until_done("c-1", &inner, || async { Ok(counters(1, 0, 0, 1)) })
                .await
        });

        tokio::time::sleep(Duration::from_millis(4500)).await;
        scope.teardown();
        assert_eq!(handle.await.unwrap().unwrap(), None);
    }
}
