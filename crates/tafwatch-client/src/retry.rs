use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use tafwatch_core::errors::FetchError;
use tafwatch_core::wire::{TmiDetail, TmiListing, TmiRequest};
use tafwatch_store::SnapshotSource;

/// Retry behaviour of [`RetryingSource`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): exponential backoff
    /// capped at `max_delay`, then spread by `±jitter_factor`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter_range = capped * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Wraps a [`SnapshotSource`] and retries retryable fetch errors with
/// exponential backoff and jitter. Final errors are returned at once.
pub struct RetryingSource<S> {
    inner: S,
    config: RetryConfig,
    total_retries: AtomicU64,
}

impl<S: SnapshotSource> RetryingSource<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.config.delay_for(attempt);
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request = what,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "retrying snapshot fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<S: SnapshotSource> SnapshotSource for RetryingSource<S> {
    async fn list_tmis(&self) -> Result<TmiListing, FetchError> {
        self.with_retry("tmis", || self.inner.list_tmis()).await
    }

    async fn fetch_tmi(&self, request: &TmiRequest) -> Result<TmiDetail, FetchError> {
        let path = request.path();
        self.with_retry(&path, || self.inner.fetch_tmi(request)).await
    }
}

/// Reconnect delays for the push stream: doubles from `initial` up to
/// `max`, back to `initial` after [`Backoff::reset`].
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedSource {
        listings: Mutex<VecDeque<Result<TmiListing, FetchError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<TmiListing, FetchError>>) -> Self {
            Self {
                listings: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn list_tmis(&self) -> Result<TmiListing, FetchError> {
            self.listings
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
        }

        async fn fetch_tmi(&self, request: &TmiRequest) -> Result<TmiDetail, FetchError> {
            Err(FetchError::NotFound(request.path()))
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn busy() -> FetchError {
        FetchError::ServerError {
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let source = RetryingSource::new(
            ScriptedSource::new(vec![Err(busy()), Err(FetchError::Network("reset".into())), Ok(TmiListing::new())]),
            fast(),
        );
        assert!(source.list_tmis().await.is_ok());
        assert_eq!(source.total_retries(), 2);
    }

    #[tokio::test]
    async fn final_error_is_not_retried() {
        let source = RetryingSource::new(ScriptedSource::new(vec![]), fast());
        let err = source
            .fetch_tmi(&TmiRequest::new("app", "s", "t", "i"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert_eq!(source.total_retries(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let source = RetryingSource::new(
            ScriptedSource::new(vec![Err(busy()), Err(busy()), Err(busy()), Err(busy()), Ok(TmiListing::new())]),
            fast(),
        );
        let err = source.list_tmis().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.total_retries(), 3);
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1_000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        for _ in 0..100 {
            let ms = config.delay_for(0).as_millis();
            assert!((800..=1_200).contains(&ms), "{ms}");
        }
    }

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
