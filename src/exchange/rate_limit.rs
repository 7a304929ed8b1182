//! Token-bucket rate limiting for exchange API calls.
//!
//! The exchange admits 8 requests per second per process for the
//! authenticated API and 30 per second for quotation data; one limiter is
//! shared by every client of the same family.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket admitting `requests_per_second` calls with a burst of the
/// same size.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = f64::from(requests_per_second.max(1));
        Self {
            capacity,
            refill_per_sec: capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token if one is immediately available.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
