//! Shared provider rate limiter.
//!
//! Two constraints at once: a ceiling on in-flight calls (semaphore) and a
//! minimum spacing between call starts. The permit is RAII; a worker that
//! panics or errors still releases its slot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

pub struct RateLimiter {
    slots:       Arc<Semaphore>,
    min_spacing: Duration,
    last_start:  Mutex<Option<Instant>>,
}

/// Held for the duration of one provider call. Dropping it frees the slot.
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            slots:       Arc::new(Semaphore::new(max_concurrent)),
            min_spacing,
            last_start:  Mutex::new(None),
        }
    }

    /// Wait for a slot, then wait out the spacing window. Call starts are
    /// serialized through the spacing lock so two acquirers can never start
    /// closer together than `min_spacing`.
    pub async fn acquire(&self) -> Permit {
        // The semaphore is never closed while the limiter is alive.
        let inner = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("limiter semaphore closed"));

        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        Permit { _inner: inner }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrency_never_exceeds_ceiling() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::ZERO));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn spacing_separates_call_starts() {
        let limiter = RateLimiter::new(4, Duration::from_millis(20));
        let mut starts = Vec::new();
        for _ in 0..3 {
            let _permit = limiter.acquire().await;
            starts.push(Instant::now());
        }
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(19));
        }
    }

    #[tokio::test]
    async fn dropped_permit_frees_the_slot() {
        let limiter = RateLimiter::new(1, Duration::ZERO);
        {
            let _permit = limiter.acquire().await;
            assert_eq!(limiter.available(), 0);
        }
        assert_eq!(limiter.available(), 1);
    }
}
