//! Exponential backoff helper shared by the cam_db and signal_db background reconnect tasks.

use std::time::Duration;

use rand::Rng;

use crate::config::BackgroundReconnectConfig;

/// Computes jittered backoff delays for a background reconnect loop.
///
/// Delay grows geometrically from `initial_delay_ms` by `backoff_multiplier` each failed
/// attempt, saturating at `max_delay_ms`, then gets `±jitter_factor` of random jitter applied
/// so many nodes reconnecting at once don't all retry in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
    attempt: u32,
}

impl Backoff {
    /// Build a fresh backoff sequence from config, starting at attempt 0.
    pub fn new(config: &BackgroundReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt, with jitter applied. Advances the internal
    /// attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(1.0 - self.jitter_factor..=1.0 + self.jitter_factor);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    /// Reset the attempt counter back to zero, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackgroundReconnectConfig {
        BackgroundReconnectConfig {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            check_interval_sec: 1,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn delay_doubles_then_saturates_without_jitter() {
        let mut backoff = Backoff::new(&config());
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(8_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10_000));
    }

    #[test]
    fn reset_restarts_from_initial_delay() {
        let mut backoff = Backoff::new(&config());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut cfg = config();
        cfg.jitter_factor = 0.25;
        let mut backoff = Backoff::new(&cfg);
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay.as_millis() > 0);
        }
    }
}
