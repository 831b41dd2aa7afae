//! Bounded retry around a single probe.

use std::sync::Arc;

use crate::probe::{ProbeResult, ProbeTarget, Prober};

/// Repeats a failed probe up to `max_attempts` total tries, with no delay
/// between tries. Non-retryable failures stop immediately.
#[derive(Clone)]
pub struct RetryingProbe {
    prober: Arc<dyn Prober>,
    max_attempts: u32,
}

impl RetryingProbe {
    pub fn new(prober: Arc<dyn Prober>, max_attempts: u32) -> Self {
        Self {
            prober,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the first success, or the last failure.
    pub async fn probe_with_retry(&self, target: &ProbeTarget) -> ProbeResult {
        let mut attempt = 1;
        loop {
            let result = self.prober.probe(target).await;
            if result.success || !result.retryable || attempt >= self.max_attempts {
                return result;
            }
            tracing::debug!(
                "attempt {}/{} failed: {}",
                attempt,
                self.max_attempts,
                result.error.as_deref().unwrap_or("unknown error")
            );
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails until `succeed_on`, counting calls.
    struct CountingProber {
        calls: AtomicU32,
        succeed_on: Option<u32>,
        error: fn() -> ProbeError,
    }

    impl CountingProber {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
                error: || ProbeError::Network("111: Connection refused".into()),
            }
        }
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, _target: &ProbeTarget) -> ProbeResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if matches!(self.succeed_on, Some(k) if n >= k) {
                ProbeResult::up(Duration::from_millis(3))
            } else {
                ProbeResult::failed(Duration::from_millis(3), &(self.error)())
            }
        }
    }

    fn target() -> ProbeTarget {
        ProbeTarget::Tcp {
            host: "192.0.2.10".into(),
            port: 22,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let prober = Arc::new(CountingProber::new(Some(1)));
        let retry = RetryingProbe::new(prober.clone(), 2);
        assert!(retry.probe_with_retry(&target()).await.success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_retried_once() {
        let prober = Arc::new(CountingProber::new(None));
        let retry = RetryingProbe::new(prober.clone(), 2);
        let result = retry.probe_with_retry(&target()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("111: Connection refused"));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_recovers() {
        let prober = Arc::new(CountingProber::new(Some(2)));
        let retry = RetryingProbe::new(prober.clone(), 2);
        assert!(retry.probe_with_retry(&target()).await.success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_config_error_not_retried() {
        let prober = Arc::new(CountingProber {
            error: || ProbeError::Config("port 70000 out of range 1-65535".into()),
            ..CountingProber::new(None)
        });
        let retry = RetryingProbe::new(prober.clone(), 5);
        let result = retry.probe_with_retry(&target()).await;
        assert!(!result.success);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_probes_once() {
        let prober = Arc::new(CountingProber::new(None));
        let retry = RetryingProbe::new(prober.clone(), 0);
        assert_eq!(retry.max_attempts, 1);
        retry.probe_with_retry(&target()).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }
}
