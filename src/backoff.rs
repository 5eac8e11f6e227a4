//! 재연결 정책: 상한이 있는 지수 백오프와 제한된 시도 횟수.
//! 타이머나 소켓 없이 직접 구동 가능.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `min(base * 2^attempt, max)`, overflow 대신 saturating
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);

    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay(), self.max_delay())
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// 다음 시도를 확보하고 그 전까지 기다릴 시간을 반환.
    ///
    /// 카운터를 먼저 증가시키고 새 값으로 지연을 계산.
    /// 시도 횟수를 다 쓰면 `None`을 반환하며 이때 카운터는 그대로 둠
    pub fn schedule(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        self.attempts += 1;
        Some(self.config.delay_for(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_backoff_delay_calculation() {
        let base = ms(1000);
        let max = ms(30000);

        assert_eq!(backoff_delay(0, base, max), ms(1000));
        assert_eq!(backoff_delay(1, base, max), ms(2000));
        assert_eq!(backoff_delay(2, base, max), ms(4000));
        assert_eq!(backoff_delay(3, base, max), ms(8000));
        assert_eq!(backoff_delay(4, base, max), ms(16000));
        assert_eq!(backoff_delay(5, base, max), ms(30000)); // 상한 적용
        assert_eq!(backoff_delay(10, base, max), ms(30000));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let config = ReconnectConfig::default();
        let mut previous = Duration::ZERO;

        for attempt in 0..=config.max_attempts {
            let delay = config.delay_for(attempt);
            let expected = (config.base_delay_ms * 2_u64.pow(attempt)).min(config.max_delay_ms);
            assert_eq!(delay, ms(expected));
            assert!(delay >= previous);
            assert!(delay <= config.max_delay());
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_saturates_on_huge_attempts() {
        assert_eq!(backoff_delay(200, ms(1000), ms(30000)), ms(30000));
        assert_eq!(backoff_delay(63, ms(u64::MAX), ms(u64::MAX)), ms(u64::MAX));
    }

    #[test]
    fn test_schedule_increments_before_computing_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        assert_eq!(policy.schedule(), Some(ms(2000)));
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.schedule(), Some(ms(4000)));
        assert_eq!(policy.attempts(), 2);
    }

    #[test]
    fn test_schedule_refused_once_budget_is_spent() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 3,
        });

        assert!(policy.schedule().is_some());
        assert!(policy.schedule().is_some());
        assert!(policy.schedule().is_some());
        assert!(policy.is_exhausted());

        assert_eq!(policy.schedule(), None);
        assert_eq!(policy.schedule(), None);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 1,
        });

        assert!(policy.schedule().is_some());
        assert_eq!(policy.schedule(), None);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.schedule(), Some(ms(200)));
    }

    #[test]
    fn test_zero_attempt_budget_never_schedules() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.schedule(), None);
        assert_eq!(policy.attempts(), 0);
    }
}
