//! Bounded readiness polling
//!
//! Replaces fixed sleeps after asynchronous provisioning (cluster ready,
//! load balancer hostname assigned, certificate issued, pods ready) with an
//! explicit poll interval, timeout and ready predicate.

use crate::error::Result;
use crate::spec::{ObservedState, ReadyCondition, ResourceKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Readiness wait configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Lead time before the first poll (milliseconds)
    #[serde(default)]
    pub initial_delay_ms: u64,
    /// Delay between polls (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound for the whole wait, initial delay included (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_poll_interval() -> u64 {
    5000
}
fn default_timeout() -> u64 {
    300_000 // 5分
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            poll_interval_ms: default_poll_interval(),
            timeout_ms: default_timeout(),
        }
    }
}

/// Result of a readiness wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The ready predicate held
    Ready(ObservedState),
    /// The resource reported a failed condition
    Failed(ObservedState),
    /// The timeout elapsed first
    TimedOut {
        elapsed: Duration,
        last: Option<ObservedState>,
    },
    /// The run was cancelled
    Cancelled,
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready(_))
    }

    /// Last observation made during the wait, if any
    pub fn observed(&self) -> Option<&ObservedState> {
        match self {
            WaitOutcome::Ready(o) | WaitOutcome::Failed(o) => Some(o),
            WaitOutcome::TimedOut { last, .. } => last.as_ref(),
            WaitOutcome::Cancelled => None,
        }
    }
}

impl WaitPolicy {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay_ms: 0,
            poll_interval_ms: poll_interval.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Default policy for a resource kind
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Cluster => {
                Self::new(Duration::from_secs(30), Duration::from_secs(30 * 60))
            }
            ResourceKind::Release => Self::new(Duration::from_secs(5), Duration::from_secs(600)),
            ResourceKind::Certificate => {
                Self::new(Duration::from_secs(10), Duration::from_secs(300))
            }
            // A fresh load balancer's DNS record is not observable right away
            ResourceKind::Network => Self::new(Duration::from_secs(10), Duration::from_secs(300))
                .with_initial_delay(Duration::from_secs(30)),
            ResourceKind::Namespace | ResourceKind::Secret => {
                Self::new(Duration::from_secs(2), Duration::from_secs(60))
            }
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll until the resource reports `Ready`
    pub async fn wait<F, Fut>(&self, cancel: &CancellationToken, probe: F) -> Result<WaitOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ObservedState>>,
    {
        self.wait_until(cancel, probe, ObservedState::is_ready).await
    }

    /// Poll until `ready` holds, the resource fails, the timeout elapses or
    /// `cancel` fires.
    ///
    /// Transient probe errors keep the loop going; any other error is returned.
    pub async fn wait_until<F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut probe: F,
        ready: P,
    ) -> Result<WaitOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ObservedState>>,
        P: Fn(&ObservedState) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.timeout();

        let lead = self.initial_delay().min(self.timeout());
        if !lead.is_zero() {
            tracing::debug!("Waiting {:?} before first readiness poll", lead);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
                _ = sleep(lead) => {}
            }
        }

        let mut last = None;
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }

            attempt += 1;
            match probe().await {
                Ok(observed) => {
                    if ready(&observed) {
                        tracing::debug!("Ready after {} poll(s)", attempt);
                        return Ok(WaitOutcome::Ready(observed));
                    }
                    if observed.ready == ReadyCondition::Failed {
                        return Ok(WaitOutcome::Failed(observed));
                    }
                    tracing::debug!("Poll {}: not ready ({})", attempt, observed.ready);
                    last = Some(observed);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Poll {} failed transiently: {}", attempt, e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut {
                    elapsed: now - start,
                    last,
                });
            }

            let pause = self.poll_interval().min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
                _ = sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(poll_ms: u64, timeout_ms: u64) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(poll_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = policy(1000, 10_000)
            .wait(&cancel, || async {
                Ok(ObservedState::present(ReadyCondition::Pending))
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        match outcome {
            WaitOutcome::TimedOut { last, .. } => {
                assert_eq!(last.unwrap().ready, ReadyCondition::Pending)
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_millis(10_000));
        assert!(elapsed <= Duration::from_millis(11_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_polls() {
        let cancel = CancellationToken::new();
        let polls = AtomicU32::new(0);

        let outcome = policy(500, 60_000)
            .wait(&cancel, || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n >= 2 {
                        Ok(ObservedState::present(ReadyCondition::Ready))
                    } else {
                        Ok(ObservedState::present(ReadyCondition::Pending))
                    }
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_ready());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_before_first_poll() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let first_poll = Arc::new(std::sync::Mutex::new(None));

        let recorder = first_poll.clone();
        policy(1000, 60_000)
            .with_initial_delay(Duration::from_secs(30))
            .wait(&cancel, move || {
                recorder.lock().unwrap().get_or_insert(start.elapsed());
                async { Ok(ObservedState::present(ReadyCondition::Ready)) }
            })
            .await
            .unwrap();

        let at = first_poll.lock().unwrap().unwrap();
        assert!(at >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_condition_stops_waiting() {
        let cancel = CancellationToken::new();
        let outcome = policy(1000, 60_000)
            .wait(&cancel, || async {
                Ok(ObservedState::present(ReadyCondition::Failed))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = policy(1000, 600_000)
            .wait(&cancel, || async {
                Ok(ObservedState::present(ReadyCondition::Pending))
            })
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(start.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_probe_errors_keep_polling() {
        let cancel = CancellationToken::new();
        let polls = AtomicU32::new(0);

        let outcome = policy(100, 10_000)
            .wait(&cancel, || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CloudError::ProviderUnavailable("connection reset".into()))
                    } else {
                        Ok(ObservedState::present(ReadyCondition::Ready))
                    }
                }
            })
            .await
            .unwrap();
        assert!(outcome.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_probe_error_propagates() {
        let cancel = CancellationToken::new();
        let result = policy(100, 10_000)
            .wait(&cancel, || async {
                Err(CloudError::NotAuthenticated("token expired".into()))
            })
            .await;
        assert!(matches!(result, Err(CloudError::NotAuthenticated(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let cancel = CancellationToken::new();
        let outcome = policy(100, 1000)
            .wait_until(
                &cancel,
                || async { Ok(ObservedState::absent()) },
                |o| !o.exists,
            )
            .await
            .unwrap();
        assert!(outcome.is_ready());
    }

    #[test]
    fn test_deserialize_defaults() {
        let policy: WaitPolicy = serde_json::from_str(r#"{"timeout_ms": 1000}"#).unwrap();
        assert_eq!(policy.poll_interval(), Duration::from_secs(5));
        assert_eq!(policy.timeout(), Duration::from_secs(1));
        assert!(policy.initial_delay().is_zero());
    }
}
