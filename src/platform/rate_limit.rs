//! Outbound message rate limiting.
//!
//! Board refreshes post many messages in a burst. Each channel gets its own
//! sliding one-minute window so one busy board never starves another.

use crate::model::ChannelId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Window is full; the oldest send ages out after `retry_after`.
    #[error("rate limit exceeded; retry after {}ms", retry_after.as_millis())]
    Exceeded { retry_after: Duration },
}

/// Sliding-window limiter for a single channel.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_per_minute: u32,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            window: VecDeque::new(),
        }
    }

    /// Record a send at `now`, or report how long to wait.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), RateLimitError> {
        while let Some(&first) = self.window.front() {
            if now.duration_since(first) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.max_per_minute as usize {
            if let Some(&oldest) = self.window.front() {
                let retry_after = WINDOW.saturating_sub(now.duration_since(oldest));
                return Err(RateLimitError::Exceeded { retry_after });
            }
        }

        self.window.push_back(now);
        Ok(())
    }

    pub fn try_acquire(&mut self) -> Result<(), RateLimitError> {
        self.try_acquire_at(Instant::now())
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max_per_minute
            .saturating_sub(u32::try_from(self.window.len()).unwrap_or(u32::MAX))
    }
}

/// One [`RateLimiter`] per channel, created on first use.
#[derive(Debug)]
pub struct ChannelRateLimiters {
    max_per_minute: u32,
    limiters: HashMap<ChannelId, RateLimiter>,
}

impl ChannelRateLimiters {
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            limiters: HashMap::new(),
        }
    }

    pub fn try_acquire(&mut self, channel: ChannelId) -> Result<(), RateLimitError> {
        self.try_acquire_at(channel, Instant::now())
    }

    pub fn try_acquire_at(
        &mut self,
        channel: ChannelId,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        let max = self.max_per_minute;
        self.limiters
            .entry(channel)
            .or_insert_with(|| RateLimiter::new(max))
            .try_acquire_at(now)
    }

    #[must_use]
    pub fn remaining(&self, channel: ChannelId) -> u32 {
        self.limiters
            .get(&channel)
            .map_or(self.max_per_minute, RateLimiter::remaining)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn blocks_once_window_is_full() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(3);
        for i in 0..3 {
            limiter
                .try_acquire_at(start + Duration::from_secs(i))
                .unwrap();
        }
        let err = limiter
            .try_acquire_at(start + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Exceeded {
                retry_after: Duration::from_secs(50)
            }
        );
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn window_slides() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(2);
        limiter.try_acquire_at(start).unwrap();
        limiter
            .try_acquire_at(start + Duration::from_secs(30))
            .unwrap();
        assert!(limiter.try_acquire_at(start + Duration::from_secs(59)).is_err());
        limiter
            .try_acquire_at(start + Duration::from_secs(60))
            .unwrap();
    }

    #[test]
    fn channels_are_isolated() {
        let now = Instant::now();
        let mut limiters = ChannelRateLimiters::new(1);
        limiters.try_acquire_at(ChannelId(1), now).unwrap();
        assert!(limiters.try_acquire_at(ChannelId(1), now).is_err());
        limiters.try_acquire_at(ChannelId(2), now).unwrap();
        assert_eq!(limiters.remaining(ChannelId(3)), 1);
        assert_eq!(limiters.remaining(ChannelId(2)), 0);
    }
}
