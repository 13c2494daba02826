//! Reconnection delays.
//!
//! Delays grow exponentially from `initial_delay` by `backoff_growth_factor`,
//! with random jitter added on top, and are clamped to `max_reconnect_delay`.
//! Within one run of failures the sequence never decreases. After
//! `max_retries` consecutive failures no further delay is handed out and the
//! caller is expected to give up until something resets it.

use crate::config::ReconnectConfig;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug)]
pub struct ReconnectionManager {
    config: ReconnectConfig,
    attempts: u32,
    last: Duration,
    rng: StdRng,
}

impl ReconnectionManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(config: ReconnectConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ReconnectConfig, rng: StdRng) -> Self {
        Self {
            config,
            attempts: 0,
            last: Duration::ZERO,
            rng,
        }
    }

    /// Failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_retries
    }

    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let max_ms = self.config.max_reconnect_delay.as_secs_f64() * 1000.0;
        let initial_ms = self.config.initial_delay.as_secs_f64() * 1000.0;
        let factor = self.config.backoff_growth_factor.max(1.0);
        let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        let base_ms = (initial_ms * factor.powi(exponent)).min(max_ms);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let jitter_ms = if jitter > 0.0 {
            base_ms * jitter * self.rng.gen::<f64>()
        } else {
            0.0
        };

        let delay_ms = (base_ms + jitter_ms).min(max_ms);
        let delay = Duration::from_nanos((delay_ms.max(0.0) * 1_000_000.0) as u64).max(self.last);

        self.attempts += 1;
        self.last = delay;
        Some(delay)
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(2),
            backoff_growth_factor: 2.0,
            max_retries,
            jitter: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn delays_never_decrease_and_stay_bounded() {
        for seed in 0..50 {
            let mut backoff = ReconnectionManager::with_seed(config(20), seed);
            let mut previous = Duration::ZERO;
            while let Some(delay) = backoff.next_delay() {
                assert!(delay >= previous, "seed {seed}: {delay:?} < {previous:?}");
                assert!(delay <= Duration::from_secs(2));
                previous = delay;
            }
            assert_eq!(previous, Duration::from_secs(2));
        }
    }

    #[test]
    fn grows_from_initial_delay() {
        let mut backoff = ReconnectionManager::with_seed(
            ReconnectConfig {
                jitter: 0.0,
                ..config(5)
            },
            7,
        );
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600].map(Duration::from_millis)
        );
    }

    #[test]
    fn exhausted_after_max_retries() {
        let mut backoff = ReconnectionManager::with_seed(config(3), 1);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = ReconnectionManager::with_seed(config(3), 1);
        while backoff.next_delay().is_some() {}

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        let first = backoff.next_delay().unwrap();
        assert!(first < Duration::from_millis(200));
    }

    #[test]
    fn zero_retries_means_no_delay() {
        let mut backoff = ReconnectionManager::with_seed(config(0), 1);
        assert_eq!(backoff.next_delay(), None);
    }
}
