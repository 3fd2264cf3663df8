//! Process-wide request throttle (spec §4.B): a monotonic-clock gate
//! enforcing a minimum spacing between outbound broker requests. Concurrent
//! callers cooperatively suspend until their turn rather than busy-wait.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RequestThrottle {
    spacing: Duration,
    next_allowed: Mutex<Instant>,
}

impl RequestThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing, next_allowed: Mutex::new(Instant::now()) }
    }

    /// Suspend the caller until the throttle permits the next request, then
    /// reserve the following slot.
    pub async fn acquire(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.spacing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_requests_with_minimum_spacing() {
        let throttle = RequestThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
