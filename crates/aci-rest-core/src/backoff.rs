//! Backoff controller
//!
//! Bounded exponential backoff with jitter:
//!
//! ```text
//! ceiling = min(base_delay * factor^n, max_delay)
//! delay   = base_delay + (0.5 + u / 2) * (ceiling - base_delay)    u in [0, 1)
//! ```
//!
//! where `n` counts the sleeps already taken, so the first retry waits
//! exactly `base_delay`.
//!
//! The delay therefore never drops below `base_delay` and never exceeds the
//! clamped exponential ceiling. Sleeping and randomness are injected so the
//! controller can be driven deterministically in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::BackoffConfig;

/// Something that can block the current task for a duration
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Source of jitter samples in `[0, 1)`
pub trait Jitter: Send + Sync {
    /// Draw one sample
    fn sample(&self) -> f64;
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Jitter drawn from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Jitter that always returns the same sample
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Delay schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Minimum delay between attempts
    pub base_delay: Duration,
    /// Exponential growth factor per attempt
    pub factor: u32,
    /// Upper bound for the exponential ceiling
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl BackoffPolicy {
    /// The clamped exponential ceiling for an attempt
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponential = base * f64::from(self.factor).powi(attempt.min(64) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64()).max(base);
        Duration::from_secs_f64(capped)
    }

    /// The jittered delay for an attempt given a sample in `[0, 1]`
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let span = self.ceiling(attempt).as_secs_f64() - base;
        let scale = sample.clamp(0.0, 1.0) / 2.0 + 0.5;
        Duration::from_secs_f64(base + scale * span)
    }
}

/// Retry decision maker with an injected sleeper and jitter source
#[derive(Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff").field("policy", &self.policy).finish()
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl Backoff {
    /// Create a controller that sleeps on the tokio timer with random jitter
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the jitter source
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// The delay schedule
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// The delay to sleep after `attempt` attempts, or `None` once
    /// `attempt >= max_attempts`
    ///
    /// The first retry waits on the `factor^0` tier.
    pub fn next_delay(&self, attempt: u32, max_attempts: u32) -> Option<Duration> {
        if attempt >= max_attempts {
            return None;
        }
        let tier = attempt.saturating_sub(1);
        Some(self.policy.delay(tier, self.jitter.sample()))
    }

    /// Decide whether to make another attempt, sleeping first if so
    ///
    /// `attempt` is the number of attempts made so far. Returns `false`
    /// without sleeping once `attempt >= max_attempts`.
    pub async fn should_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        match self.next_delay(attempt, max_attempts) {
            Some(delay) => {
                debug!("Retrying in {:?} after attempt {} of {}", delay, attempt, max_attempts);
                self.sleeper.sleep(delay).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_secs(4),
            factor: 3,
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn ceiling_grows_then_caps() {
        let p = policy();
        assert_eq!(p.ceiling(0), Duration::from_secs(4));
        assert_eq!(p.ceiling(1), Duration::from_secs(12));
        assert_eq!(p.ceiling(2), Duration::from_secs(36));
        assert_eq!(p.ceiling(3), Duration::from_secs(60));
        assert_eq!(p.ceiling(40), Duration::from_secs(60));
    }

    #[test]
    fn jitter_scales_between_half_and_full_span() {
        let p = policy();
        // attempt 1: span = 12 - 4 = 8
        assert_eq!(p.delay(1, 0.0), Duration::from_secs(8));
        assert_eq!(p.delay(1, 1.0), Duration::from_secs(12));
        assert_eq!(p.delay(0, 0.7), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn stops_without_sleeping_at_bound() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let backoff = Backoff::new(policy())
            .with_sleeper(sleeper.clone())
            .with_jitter(Arc::new(FixedJitter(0.0)));

        assert!(backoff.should_retry(1, 3).await);
        assert!(backoff.should_retry(2, 3).await);
        assert!(!backoff.should_retry(3, 3).await);
        assert!(!backoff.should_retry(0, 0).await);

        let slept = sleeper.slept.lock().unwrap().clone();
        assert_eq!(slept, vec![Duration::from_secs(4), Duration::from_secs(8)]);
    }

    #[test]
    fn first_retry_waits_the_base_delay() {
        let p = policy();
        for sample in [0.0, 0.5, 1.0] {
            let backoff = Backoff::new(p).with_jitter(Arc::new(FixedJitter(sample)));
            assert_eq!(backoff.next_delay(1, 9), Some(p.base_delay));
        }

        let backoff = Backoff::new(p).with_jitter(Arc::new(FixedJitter(1.0)));
        assert_eq!(backoff.next_delay(2, 9), Some(Duration::from_secs(12)));
        assert_eq!(backoff.next_delay(3, 9), Some(Duration::from_secs(36)));
        assert_eq!(backoff.next_delay(4, 9), Some(Duration::from_secs(60)));
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(attempt in 0u32..12, max_attempts in 0u32..10, sample in 0.0f64..1.0) {
            let backoff = Backoff::new(policy()).with_jitter(Arc::new(FixedJitter(sample)));
            let p = policy();

            match backoff.next_delay(attempt, max_attempts) {
                Some(delay) => {
                    prop_assert!(attempt < max_attempts);
                    let tier = attempt.saturating_sub(1).min(10);
                    let ceiling = p.max_delay.min(p.base_delay * 3u32.pow(tier));
                    prop_assert!(delay >= p.base_delay);
                    prop_assert!(delay <= ceiling + Duration::from_micros(1));
                }
                None => prop_assert!(attempt >= max_attempts),
            }
        }
    }
}
