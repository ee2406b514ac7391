use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Trait defining backoff behavior
pub trait Backoff: Send + Sync {
    /// Delay to wait before retry number `retry` (1-based)
    fn next_delay(&self, retry: u32) -> Duration;
}

/// Exponential backoff with optional jitter
///
/// The delay before retry `n` is `initial_delay * multiplier^(n-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            multiplier,
            ..ExponentialBackoffBuilder::default().build()
        }
    }

    /// Create a new builder for ExponentialBackoff
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    fn calculate_delay(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exp_delay = base * self.multiplier.powi(exponent);
        let max_delay = self.max_delay.as_millis() as f64;

        // Cap before jitter so the jitter range stays bounded
        let capped_delay = exp_delay.min(max_delay);

        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).clamp(0.0, max_delay);

        trace!(
            retry = retry,
            base_delay_ms = capped_delay,
            jitter_ms = jitter,
            final_delay_ms = final_delay,
            "Calculated backoff delay"
        );

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoffBuilder::default().build()
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, retry: u32) -> Duration {
        self.calculate_delay(retry)
    }
}

/// Builder for ExponentialBackoff
#[derive(Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl ExponentialBackoffBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Fixed backoff implementation
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, retry: u32) -> Duration {
        trace!(retry = retry, delay_ms = ?self.delay.as_millis(), "Fixed backoff delay");
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exponential_backoff_defaults() {
        let backoff = ExponentialBackoff::default();

        assert_eq!(backoff.next_delay(1), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let max_delay = Duration::from_secs(10);
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(max_delay)
            .multiplier(2.0)
            .jitter_factor(0.1)
            .build();

        let delays: Vec<Duration> = (1..6).map(|retry| backoff.next_delay(retry)).collect();
        for i in 1..delays.len() {
            assert!(delays[i] >= delays[i - 1] || delays[i] == max_delay);
        }

        let max_attempt_delay = backoff.next_delay(40);
        assert!(
            max_attempt_delay <= max_delay,
            "Delay {:?} exceeded max delay {:?}",
            max_attempt_delay,
            max_delay
        );
    }

    #[test]
    fn test_jitter_variation() {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter_factor(0.5)
            .build();

        let delays: Vec<Duration> = (0..100).map(|_| backoff.next_delay(2)).collect();

        let unique_delays: std::collections::HashSet<_> = delays.iter().collect();
        assert!(unique_delays.len() > 1);

        let base_delay = 200.0; // 100ms * 2^1
        for delay in delays {
            let ms = delay.as_millis() as f64;
            assert!(ms >= base_delay * 0.5 - 1.0);
            assert!(ms <= base_delay * 1.5);
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = FixedBackoff::new(Duration::from_millis(100));

        for retry in 1..5 {
            assert_eq!(backoff.next_delay(retry), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_builder_constraints() {
        let backoff = ExponentialBackoff::builder().jitter_factor(1.5).build();
        assert!(backoff.jitter_factor <= 1.0);

        let backoff = ExponentialBackoff::builder().jitter_factor(-0.5).build();
        assert!(backoff.jitter_factor >= 0.0);

        let backoff = ExponentialBackoff::builder().multiplier(0.5).build();
        assert!(backoff.multiplier >= 1.0);
    }
}
