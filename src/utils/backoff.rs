//! 指数退避

use std::time::Duration;

const MULTIPLIER: f64 = 2.0;

/// 指数退避计时器
///
/// 第 n 次调用 `next_delay` 返回 `initial * 2^n`，不超过 `max`。
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = MULTIPLIER.powi(self.attempts.min(i32::MAX as u32) as i32);
        let delay_ms = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_max_below_initial_uses_initial() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(300), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
    }
}
