//! Reconnect delay schedule.
//!
//! `delay(n) = min(base * 2^min(n, max_exponent), max) + uniform[0, jitter)`.
//! The attempt counter advances on every scheduled reconnect and is reset only
//! after a successful `auth`.

use crate::config::ReconnectConfig;

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_exponent: u32,
    jitter_ms: u64,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            max_exponent: config.max_exponent,
            jitter_ms: config.jitter_ms,
            attempt: 0,
        }
    }

    /// Attempts scheduled since the last successful authentication.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before jitter for a given attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(self.max_exponent));
        self.base.saturating_mul(factor).min(self.max)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..self.jitter_ms))
    }
}

impl Backoff for ReconnectPolicy {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.base_delay(self.attempt) + self.jitter();
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}
