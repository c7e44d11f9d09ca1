//! Bounded waiting shared by the engine loader and the document session

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Gave up after waiting {waited:?}")]
pub struct TimedOut {
    pub waited: Duration,
}

/// A wait bounded by wall-clock time, polled at a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl BoundedWait {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// A wait expressed as a number of polls rather than a deadline
    pub fn attempts(attempts: u32, poll_interval: Duration) -> Self {
        Self {
            timeout: poll_interval * attempts,
            poll_interval,
        }
    }

    /// Number of sleeps between the first and the last check
    pub fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        ((self.timeout.as_millis() / interval) as u32).max(1)
    }

    /// Poll `ready` until it returns true or the polls run out
    pub async fn until<F>(&self, mut ready: F) -> Result<(), TimedOut>
    where
        F: FnMut() -> bool,
    {
        if ready() {
            return Ok(());
        }
        for _ in 0..self.max_polls() {
            tokio::time::sleep(self.poll_interval).await;
            if ready() {
                return Ok(());
            }
        }
        Err(TimedOut {
            waited: self.poll_interval * self.max_polls(),
        })
    }

    /// Await `future`, giving up after the timeout
    pub async fn on<F>(&self, future: F) -> Result<F::Output, TimedOut>
    where
        F: Future,
    {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| TimedOut {
                waited: self.timeout,
            })
    }
}
