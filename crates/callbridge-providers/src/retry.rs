use std::time::Duration;

use callbridge_core::config::AssistantConfig;

/// Bounded polling with linearly increasing delay:
/// attempt `n` (zero-based) waits `base + n * step` before polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, step: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            step,
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(
            config.max_poll_attempts,
            Duration::from_millis(config.poll_base_delay_ms),
            Duration::from_millis(config.poll_step_ms),
        )
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }

    /// Total time spent waiting if every attempt is used.
    pub fn budget(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.delay(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AssistantConfig::default())
    }
}
