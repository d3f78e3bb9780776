use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum spacing between successive outbound calls.
///
/// One instance is shared (behind an `Arc`) by every resolver that talks to
/// the same upstream. Callers queue on the inner mutex, so concurrent callers
/// are released one at a time, each at least `min_interval` after the previous.
#[derive(Debug)]
pub struct Throttle {
    last_call: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the caller may issue its call, then records the call time.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "throttling nutrient lookup");
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_call_is_not_delayed() {
        let throttle = Throttle::new(Duration::from_millis(500));
        let start = Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn successive_calls_are_spaced() {
        let throttle = Throttle::new(Duration::from_millis(60));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_gate() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(50)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&throttle);
                tokio::spawn(async move {
                    t.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();

        assert!(start.elapsed() >= Duration::from_millis(150));
        for pair in stamps.windows(2) {
            // small slack for timer granularity
            assert!(pair[1] - pair[0] >= Duration::from_millis(45));
        }
    }

    #[tokio::test]
    async fn separate_instances_do_not_interfere() {
        let a = Throttle::new(Duration::from_millis(300));
        let b = Throttle::new(Duration::from_millis(300));
        a.acquire().await;
        let start = Instant::now();
        b.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
