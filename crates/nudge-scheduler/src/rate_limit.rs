//! Sliding-window limit on downstream sends.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Allows at most `max_per_window` sends in any `window`, shared by all
/// workers. A limit of 0 disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_second(max: u32) -> Self {
        Self::new(max, Duration::from_secs(1))
    }

    /// Record a send if the window has room. Otherwise return how long until
    /// the oldest send ages out.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        if self.max_per_window == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut sent = self.sent.lock().await;
        while let Some(&first) = sent.front() {
            if now.duration_since(first) >= self.window {
                sent.pop_front();
            } else {
                break;
            }
        }

        if sent.len() >= self.max_per_window as usize {
            let wait = sent
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(wait.max(Duration::from_millis(1)));
        }

        sent.push_back(now);
        Ok(())
    }

    /// Wait until a send is allowed, then record it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire().await {
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_under_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.try_acquire().await.is_ok());
        }
        let wait = limiter.try_acquire().await.unwrap_err();
        assert!(wait <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_zero_disables_limit() {
        let limiter = RateLimiter::per_second(0);
        for _ in 0..100 {
            assert!(limiter.try_acquire().await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::per_second(2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
