//! 송신 재시도 백오프
//!
//! 송신 버퍼가 가득 찬 경우(EAGAIN) 처음 몇 번은 yield만 하고,
//! 그 뒤로는 대기 시간을 두 배씩 늘려 `max`에서 멈춘다.

use std::cmp::min;
use std::thread;
use std::time::Duration;

use crate::config::BackoffConfig;

pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    next_sleep: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            attempts: 0,
            next_sleep: config.initial,
            config,
        }
    }

    /// 성공 후 초기 상태로
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_sleep = self.config.initial;
    }

    /// 지금까지의 재시도 횟수
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 다음 대기 시간 계산. `None`이면 yield만 한다.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts <= self.config.spins {
            return None;
        }

        let delay = self.next_sleep;
        self.next_sleep = min(self.next_sleep.saturating_mul(2), self.config.max);
        Some(delay)
    }

    /// 현재 스레드를 양보하거나 잠시 재움
    pub fn wait(&mut self) {
        match self.next_delay() {
            Some(delay) if !delay.is_zero() => thread::sleep(delay),
            _ => thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(spins: u32, initial_us: u64, max_us: u64) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_micros(initial_us),
            max: Duration::from_micros(max_us),
            spins,
        }
    }

    #[test]
    fn test_spins_then_doubles_until_max() {
        let mut backoff = Backoff::new(config(2, 10, 50));

        let delays: Vec<Option<Duration>> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                None,
                None,
                Some(Duration::from_micros(10)),
                Some(Duration::from_micros(20)),
                Some(Duration::from_micros(40)),
                Some(Duration::from_micros(50)),
                Some(Duration::from_micros(50)),
            ]
        );
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(config(0, 10, 1000));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_micros(10)));
    }

    #[test]
    fn test_wait_returns() {
        let mut backoff = Backoff::new(config(1, 1, 2));
        backoff.wait();
        backoff.wait();
        assert_eq!(backoff.attempts(), 2);
    }
}
