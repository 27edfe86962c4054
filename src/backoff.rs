use rand::Rng;
use std::time::Duration;

/// Delay between reconnect attempts: grows by `factor` per attempt up to
/// `max`, each delay jittered by ±25 %.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        ExponentialBackoff {
            initial,
            max,
            factor,
            current: initial.min(max),
        }
    }

    /// The delay to wait before the next attempt. Advances the state.
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = u64::try_from(self.current.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = Duration::from_millis((current_ms as f64 * jitter) as u64);

        // float to int casts saturate
        let next_ms = (current_ms as f64 * self.factor) as u64;
        self.current = Duration::from_millis(next_ms.min(max_ms));

        delay
    }

    /// Back to the initial delay, once a connection made progress.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}
