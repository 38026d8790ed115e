//! Exponential reconnect backoff with jitter.
//!
//! The delay starts at `base`, doubles after every failure up to `max`, and
//! each returned delay carries an extra uniform jitter of up to
//! `jitter_ratio * delay` so that several clients behind one bridge do not
//! reconnect in lockstep. A successful connect calls
//! [`reset`](Backoff::reset).

use std::time::Duration;

use rand::Rng;

/// Default first delay.
pub const DEFAULT_BASE: Duration = Duration::from_secs(1);

/// Default ceiling for the un-jittered delay.
pub const DEFAULT_MAX: Duration = Duration::from_secs(60);

/// Default jitter as a fraction of the delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Reconnect delay generator.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
    current: Duration,
}

impl Backoff {
    /// Create a backoff. `max` is raised to `base` if smaller, and the
    /// jitter ratio is clamped to `0.0..=1.0`.
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Backoff {
            base,
            max: max.max(base),
            jitter_ratio,
            current: base,
        }
    }

    /// The un-jittered delay the next call to
    /// [`next_delay`](Backoff::next_delay) will start from.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Upper bound of any single delay, jitter included.
    pub fn ceiling(&self) -> Duration {
        self.max + self.max.mul_f64(self.jitter_ratio)
    }

    /// Return the next delay and advance the sequence.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);

        if self.jitter_ratio > 0.0 {
            delay + delay.mul_f64(rng.gen_range(0.0..=self.jitter_ratio))
        } else {
            delay
        }
    }

    /// Restart the sequence from `base`.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(DEFAULT_BASE, DEFAULT_MAX, DEFAULT_JITTER_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn doubles_until_capped_without_jitter() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<u64> = (0..9)
            .map(|_| backoff.next_delay(&mut rng).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn unjittered_sequence_is_non_decreasing_and_capped() {
        let max = Duration::from_millis(700);
        let mut backoff = Backoff::new(Duration::from_millis(30), max, 0.25);
        let mut rng = StdRng::seed_from_u64(7);
        let mut previous = Duration::ZERO;
        for _ in 0..50 {
            let base = backoff.current();
            assert!(base >= previous);
            assert!(base <= max);
            previous = base;
            backoff.next_delay(&mut rng);
        }
    }

    #[test]
    fn jitter_within_bound() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut backoff = Backoff::default();
        for _ in 0..200 {
            let base = backoff.current();
            let delay = backoff.next_delay(&mut rng);
            assert!(delay >= base, "{delay:?} < {base:?}");
            assert!(delay <= base + base.mul_f64(DEFAULT_JITTER_RATIO));
            assert!(delay <= backoff.ceiling());
        }
    }

    #[test]
    fn jitter_actually_varies() {
        let mut rng = StdRng::seed_from_u64(3);
        let delays: Vec<Duration> = (0..20)
            .map(|_| {
                let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(60), 0.1);
                b.next_delay(&mut rng)
            })
            .collect();
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);
        backoff.next_delay(&mut rng);
        backoff.next_delay(&mut rng);
        assert_eq!(backoff.current(), Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_millis(100));
    }

    #[test]
    fn constructor_normalizes_inputs() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 3.0);
        assert_eq!(backoff.ceiling(), Duration::from_secs(10));
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(2), f64::NAN);
        assert_eq!(backoff.ceiling(), Duration::from_secs(2));
    }
}
