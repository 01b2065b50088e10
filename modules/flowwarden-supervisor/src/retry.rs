use std::time::Duration;

use async_trait::async_trait;

/// Injectable sleep, so attachment retries can be driven without wall-clock
/// delay in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Attachment attempts within one cycle. Never persisted.
#[derive(Debug, Clone)]
pub struct RetryState {
    interval: Duration,
    attempts: u32,
    waited: Duration,
}

impl RetryState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            attempts: 0,
            waited: Duration::ZERO,
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// The wait before the next attempt. Constant for the whole cycle.
    pub fn backoff(&self) -> Duration {
        self.interval
    }

    pub fn record_wait(&mut self, waited: Duration) {
        self.waited += waited;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}
