//! Sliding-window request rate limiter.
//!
//! Keeps the timestamps of the last N requests inside a trailing window and
//! blocks new requests until fewer than N remain. No token refill — an
//! emptier window simply permits immediate issue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Wall-clock sliding-window limiter. One instance per connector; safe to
/// share across tasks.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limit to `max_per_minute` requests over a trailing 60 seconds.
    pub fn new(max_per_minute: usize) -> Self {
        Self::with_window(max_per_minute, Duration::from_secs(60))
    }

    /// Limit to `max_per_window` requests over an arbitrary trailing window.
    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until the window has room, then record the new request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max_per_window {
                    stamps.push_back(now);
                    return;
                }
                // Oldest entry decides when a slot opens.
                self.window - now.duration_since(*stamps.front().expect("non-empty window"))
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted against the window.
    #[allow(dead_code)]
    pub async fn in_flight(&self) -> usize {
        let mut stamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        stamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_under_capacity_is_immediate() {
        let limiter = RateLimiter::with_window(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.in_flight().await, 5);
    }

    #[tokio::test]
    async fn test_blocks_until_window_slides() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third acquisition must wait for the first to age out.
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_window_bound_holds() {
        // Over any window, at most N requests are admitted.
        let limiter = RateLimiter::with_window(3, Duration::from_millis(300));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_flight().await, 3);
        limiter.acquire().await;
        // The slide admitted the fourth, so the window never held more than 3.
        assert!(limiter.in_flight().await <= 3);
    }

    #[tokio::test]
    async fn test_empty_window_after_expiry() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(50));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.in_flight().await, 0);
    }
}
