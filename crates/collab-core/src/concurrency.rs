use crate::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_PER_PROVIDER_CONCURRENCY: usize = 3;
const PROVIDER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounded per-provider concurrency ceiling (C4.1). Acquisition is FIFO;
/// release happens unconditionally when the returned permit is dropped.
pub struct ConcurrencyManager {
    semaphores: HashMap<Provider, Arc<Semaphore>>,
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PROVIDER_CONCURRENCY)
    }
}

impl ConcurrencyManager {
    pub fn new(per_provider_limit: usize) -> Self {
        let semaphores = Provider::all()
            .map(|p| (p, Arc::new(Semaphore::new(per_provider_limit))))
            .collect();
        Self { semaphores }
    }

    pub async fn acquire(&self, provider: Provider) -> OwnedSemaphorePermit {
        let sem = self.semaphores[&provider].clone();
        sem.acquire_owned().await.expect("semaphore never closed")
    }
}

/// Session-wide deadline plus cascading per-call child deadlines (C4.2). A
/// child's own timeout never aborts siblings; only the session-level
/// deadline (or an explicit global abort) does that.
#[derive(Clone, Copy)]
pub struct DeadlineManager {
    session_deadline: Instant,
}

impl DeadlineManager {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            session_deadline: Instant::now() + max_duration,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        Instant::now() >= self.session_deadline
    }

    pub fn remaining(&self) -> Duration {
        self.session_deadline.saturating_duration_since(Instant::now())
    }

    /// Derived deadline for one provider call: `min(remaining-session-deadline,
    /// provider-default)`.
    pub fn child_deadline(&self) -> Duration {
        self.remaining().min(PROVIDER_DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrency_limit_blocks_fourth_acquire() {
        let mgr = ConcurrencyManager::new(3);
        let p1 = mgr.acquire(Provider::Claude).await;
        let p2 = mgr.acquire(Provider::Claude).await;
        let p3 = mgr.acquire(Provider::Claude).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), mgr.acquire(Provider::Claude)).await;
        assert!(blocked.is_err(), "fourth acquire should block while 3 permits are held");

        drop(p1);
        let fourth = tokio::time::timeout(Duration::from_millis(50), mgr.acquire(Provider::Claude)).await;
        assert!(fourth.is_ok(), "releasing one permit should unblock the next acquire");

        drop(p2);
        drop(p3);
    }

    #[test]
    fn child_deadline_never_exceeds_session_remaining() {
        let dm = DeadlineManager::new(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(dm.is_session_expired());
        assert_eq!(dm.child_deadline(), Duration::ZERO);
    }

    #[test]
    fn child_deadline_caps_at_provider_default() {
        let dm = DeadlineManager::new(Duration::from_secs(99999));
        assert_eq!(dm.child_deadline(), PROVIDER_DEFAULT_TIMEOUT);
    }
}
