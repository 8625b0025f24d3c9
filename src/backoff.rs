//! Retry backoff calculator.
//!
//! Pure functions over an explicit [`RngSource`] so delay computation is
//! deterministic under test, unlike a strategy that reaches for
//! `SystemTime::now()` directly.

use std::time::Duration;

/// Source of the single random unit interval `[0.0, 1.0)` jitter needs.
///
/// Production code uses [`RandRngSource`]; tests supply a fixed value.
pub trait RngSource: Send + Sync {
    fn unit_interval(&self) -> f64;
}

/// Default entropy source, backed by `rand`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandRngSource;

impl RngSource for RandRngSource {
    fn unit_interval(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Fixed-value entropy source for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRngSource(pub f64);

impl RngSource for FixedRngSource {
    fn unit_interval(&self) -> f64 {
        self.0
    }
}

/// How jitter is applied to the computed base delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No jitter; the base delay is used as-is.
    Disabled,
    /// Full jitter: uniformly sampled from `[0, base_delay]`.
    Full,
    /// Partial jitter: uniformly sampled from
    /// `[base_delay * (1 - factor), base_delay]`. `factor` is clamped to
    /// `[0.0, 1.0]`.
    Partial(f64),
    /// Decorrelated jitter (AWS's algorithm): uniformly sampled from
    /// `[initial, previous_delay * 3]`, then capped at `max`.
    Decorrelated,
}

/// Shape of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Every attempt waits the same `initial` delay.
    Fixed,
    /// `initial * multiplier.powi(attempt)`, capped at `max`.
    Exponential,
}

/// Backoff calculator configuration.
///
/// Defaults match the spec's recommended retry posture: exponential
/// growth with full jitter, 1s initial delay, 2x multiplier, 60s cap.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    strategy: BackoffStrategy,
    jitter: Jitter,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl BackoffConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Base delay before jitter, for `attempt` (0-indexed).
    fn base_delay(&self, attempt: u32) -> Duration {
        let secs = match self.strategy {
            BackoffStrategy::Fixed => self.initial.as_secs_f64(),
            BackoffStrategy::Exponential => {
                self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32)
            }
        };
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Compute the delay before retrying `attempt`, using `rng` as the
    /// single source of randomness for jitter.
    ///
    /// `previous_delay` is only consulted by [`Jitter::Decorrelated`]; pass
    /// `None` on the first retry.
    pub fn delay_for_attempt(
        &self,
        attempt: u32,
        previous_delay: Option<Duration>,
        rng: &dyn RngSource,
    ) -> Duration {
        let base = self.base_delay(attempt);

        match self.jitter {
            Jitter::Disabled => base,
            Jitter::Full => Duration::from_secs_f64(base.as_secs_f64() * rng.unit_interval()),
            Jitter::Partial(factor) => {
                let factor = factor.clamp(0.0, 1.0);
                let floor = base.as_secs_f64() * (1.0 - factor);
                let span = base.as_secs_f64() * 2.0 * factor;
                Duration::from_secs_f64(floor + span * rng.unit_interval())
            }
            Jitter::Decorrelated => {
                let prev = previous_delay.unwrap_or(self.initial).as_secs_f64();
                let upper = (prev * 3.0).max(self.initial.as_secs_f64());
                let sampled = self.initial.as_secs_f64()
                    + rng.unit_interval() * (upper - self.initial.as_secs_f64());
                Duration::from_secs_f64(sampled.min(self.max.as_secs_f64()))
            }
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            jitter: Jitter::Full,
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(60_000),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_strategy_never_grows() {
        let cfg = BackoffConfig::new()
            .with_strategy(BackoffStrategy::Fixed)
            .with_jitter(Jitter::Disabled)
            .with_initial(Duration::from_secs(5));
        let rng = FixedRngSource(0.0);

        assert_eq!(cfg.delay_for_attempt(0, None, &rng), Duration::from_secs(5));
        assert_eq!(cfg.delay_for_attempt(9, None, &rng), Duration::from_secs(5));
    }

    #[test]
    fn exponential_strategy_doubles_until_cap() {
        let cfg = BackoffConfig::new().with_jitter(Jitter::Disabled);
        let rng = FixedRngSource(0.0);

        assert_eq!(cfg.delay_for_attempt(0, None, &rng), Duration::from_secs(1));
        assert_eq!(cfg.delay_for_attempt(1, None, &rng), Duration::from_secs(2));
        assert_eq!(cfg.delay_for_attempt(2, None, &rng), Duration::from_secs(4));
        assert_eq!(
            cfg.delay_for_attempt(10, None, &rng),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn full_jitter_stays_within_base_delay_bounds() {
        let cfg = BackoffConfig::new().with_jitter(Jitter::Full);

        let low = cfg.delay_for_attempt(2, None, &FixedRngSource(0.0));
        let high = cfg.delay_for_attempt(2, None, &FixedRngSource(0.999_999));

        assert_eq!(low, Duration::ZERO);
        assert!(high.as_secs_f64() <= 4.0);
        assert!(high.as_secs_f64() > 3.9);
    }

    #[test]
    fn partial_jitter_spans_base_times_one_minus_and_one_plus_factor() {
        let cfg = BackoffConfig::new().with_jitter(Jitter::Partial(0.25));

        let low = cfg.delay_for_attempt(2, None, &FixedRngSource(0.0));
        let high = cfg.delay_for_attempt(2, None, &FixedRngSource(1.0));

        assert!((low.as_secs_f64() - 3.0).abs() < 1e-9); // 4s * (1 - 0.25)
        assert!((high.as_secs_f64() - 5.0).abs() < 1e-9); // 4s * (1 + 0.25)
    }

    #[test]
    fn decorrelated_jitter_grows_from_previous_delay_and_respects_cap() {
        let cfg = BackoffConfig::new()
            .with_jitter(Jitter::Decorrelated)
            .with_max(Duration::from_secs(10));

        let first = cfg.delay_for_attempt(0, None, &FixedRngSource(1.0));
        assert!(first.as_secs_f64() <= 3.0);

        let capped = cfg.delay_for_attempt(1, Some(Duration::from_secs(100)), &FixedRngSource(1.0));
        assert_eq!(capped, Duration::from_secs(10));
    }
}
