//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use docgen_shared::GenerationConfig;

/// Delay schedule shared by rate-limit and transport retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay, including server hints.
    pub max: Duration,
    /// Multiply each delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Backoff {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            base: config.base_backoff,
            max: config.max_backoff,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    ///
    /// A server-provided `Retry-After` hint replaces the computed delay.
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max);
        }

        let multiplier = 2f64.powi(retry.min(30) as i32);
        let capped_secs = (self.base.as_secs_f64() * multiplier).min(self.max.as_secs_f64());

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}
