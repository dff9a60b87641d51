use std::time::{Duration, Instant};

/// Global per-source rate limiter
///
/// Enforces a minimum interval between requests so one source never sees
/// more than `per_second` requests in any second. All strategies of a
/// source share one limiter through the client, which serializes access.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter allowing `per_second` requests per second
    pub fn new(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(per_second)),
            last_request: None,
        }
    }

    /// Time remaining before the next request may be issued
    ///
    /// Returns None when a request can go out immediately.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request?;
        let elapsed = now.duration_since(last);
        if elapsed < self.interval {
            Some(self.interval - elapsed)
        } else {
            None
        }
    }

    /// Waits until the interval has elapsed, then records the request
    pub async fn acquire(&mut self) {
        if let Some(wait) = self.time_until_ready(Instant::now()) {
            tokio::time::sleep(wait).await;
        }
        self.last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_immediately_when_fresh() {
        let limiter = RateLimiter::new(5);
        assert!(limiter.time_until_ready(Instant::now()).is_none());
    }

    #[test]
    fn test_waits_after_request() {
        let mut limiter = RateLimiter::new(5);
        let now = Instant::now();
        limiter.last_request = Some(now);

        // 5/s means 200ms interval
        let wait = limiter.time_until_ready(now).unwrap();
        assert_eq!(wait, Duration::from_millis(200));

        let soon = now + Duration::from_millis(150);
        let wait = limiter.time_until_ready(soon).unwrap();
        assert_eq!(wait, Duration::from_millis(50));

        let later = now + Duration::from_millis(250);
        assert!(limiter.time_until_ready(later).is_none());
    }

    #[test]
    fn test_zero_per_second_clamped() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_acquire_records_request() {
        let mut limiter = RateLimiter::new(1000);
        limiter.acquire().await;
        assert!(limiter.last_request.is_some());
    }
}
