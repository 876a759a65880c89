use crate::error::CollabError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

const MAX_RETRIES: u32 = 2;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const JITTER: f64 = 0.2;

/// `initial × 2^attempt × (1 ± jitter)`, attempt is 0-indexed (the first
/// retry, after the initial call, is attempt 0).
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_DELAY.as_secs_f64() * 2f64.powi(attempt as i32);
    let jitter_factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
    Duration::from_secs_f64((base * jitter_factor).max(0.0))
}

/// Cross-cutting retry wrapper (C6), implemented once rather than duplicated
/// per provider. `on_retry(attempt)` fires before each retry's delay so the
/// caller can emit `agent_retry`. A retry always uses a fresh per-attempt
/// deadline via `fresh_deadline`; the session-level deadline is never reset.
pub async fn with_retry<T, F, Fut>(
    mut attempt_fn: F,
    mut on_retry: impl FnMut(u32),
) -> Result<T, CollabError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollabError>>,
{
    let mut attempt = 0;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                on_retry(attempt);
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_delay_grows_geometrically_within_jitter() {
        let d0 = backoff_delay(0).as_secs_f64();
        let d1 = backoff_delay(1).as_secs_f64();
        // attempt 0: ~1s +/-20%, attempt 1: ~2s +/-20% — ranges don't overlap.
        assert!(d0 < 1.3 && d0 > 0.7);
        assert!(d1 < 2.6 && d1 > 1.4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_two_times_then_gives_up() {
        let calls = AtomicU32::new(0);
        let retries_seen = AtomicU32::new(0);
        let result: Result<(), CollabError> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CollabError::ProviderTransient {
                        provider: "claude".into(),
                        message: "timeout".into(),
                    })
                }
            },
            |_attempt| {
                retries_seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CollabError> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CollabError::CostLimitExceeded) }
            },
            |_| panic!("must not retry a fatal error"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry_on_first_try() {
        let result = with_retry(|| async { Ok::<_, CollabError>(42) }, |_| panic!("no retry expected")).await;
        assert_eq!(result.unwrap(), 42);
    }
}
