use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces outbound requests at least `delay` apart, across all tasks sharing
/// the limiter.
pub struct RateLimiter {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for this caller's slot. Slots are handed out in call order.
    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + self.delay);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
