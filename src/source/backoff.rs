//! Retry delays for reconnecting event sources

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("maximum retry attempts exceeded ({0})")]
pub struct MaxRetriesExceeded(pub u32);

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Delay before the next attempt, doubling per attempt up to `max_delay`
    pub fn next_delay(&self) -> Duration {
        let factor = 2_u32.saturating_pow(self.current_attempt);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded(self.max_retries));
        }

        let delay = self.next_delay();
        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500), 10);

        let mut delays = Vec::new();
        for attempt in 0..5 {
            backoff.current_attempt = attempt;
            delays.push(backoff.next_delay().as_millis());
        }
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), u32::MAX);
        backoff.current_attempt = 200;
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(2), 2);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        assert_eq!(backoff.sleep().await, Err(MaxRetriesExceeded(2)));

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.sleep().await.is_ok());
    }
}
