//! Configuration for the sync engine.

use std::time::Duration;
use taskdeck_sync_protocol::ShapeDescriptor;

/// Configuration for one sync engine instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The shape to subscribe to.
    pub shape: ShapeDescriptor,
    /// URL of the server's apply-changes endpoint.
    pub apply_changes_url: String,
    /// Backoff schedule for failed pushes and feed fetches.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given shape and write endpoint.
    pub fn new(shape: ShapeDescriptor, apply_changes_url: impl Into<String>) -> Self {
        Self {
            shape,
            apply_changes_url: apply_changes_url.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Backoff schedule for retried operations.
///
/// Retries themselves are unbounded: a dirty row stays dirty until the
/// server accepts it, and a broken feed is refetched for the lifetime of
/// the subscription. The schedule only spaces the attempts out, capping at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default schedule: 100ms initial, doubling, 30s cap,
    /// jittered.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a schedule with no waiting, for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before retry attempt `attempt` (1-indexed;
    /// attempt 0 is the original try and has no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap jitter source (no external RNG dependency).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
