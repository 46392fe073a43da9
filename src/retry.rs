//! Retry combinators (spec §4.2). Both forms are bounded at
//! [`crate::model::MAX_ERR_RETRY_COUNT`] attempts with 1s/3s/5s spacing
//! between them, mirroring the `(2*step-1)`-second backoff of the
//! original source. Neither form carries module-level state; each call
//! owns its own strategy iterator, so they're safely reentrant.

use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;

/// `1s, 3s, 5s` between attempts 1→2, 2→3, 3→4 — three gaps for four attempts.
fn backoff() -> impl Iterator<Item = Duration> {
    [1u64, 3, 5].into_iter().map(Duration::from_secs)
}

/// Retries `action` while `is_transient` returns true for its error, up
/// to [`crate::model::MAX_ERR_RETRY_COUNT`] attempts total. On the
/// final failing attempt the original error is returned untouched.
pub async fn retry_if<F, Fut, T, E>(mut action: F, is_transient: impl Fn(&E) -> bool) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryIf::spawn(backoff(), move || action(), |e: &E| is_transient(e)).await
}

/// Retries `action` only when its error matches one of `classes` under
/// `classify`. Exact-match semantics on the classified error "kind" —
/// the caller supplies the projection since error chains vary by
/// subsystem (HTTP status, SQLSTATE code, io::ErrorKind, ...).
pub async fn retry_on_classes<F, Fut, T, E, C>(
    mut action: F,
    classes: &[C],
    classify: impl Fn(&E) -> Option<C>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: PartialEq,
{
    RetryIf::spawn(
        backoff(),
        move || action(),
        |e: &E| classify(e).map(|c| classes.contains(&c)).unwrap_or(false),
    )
    .await
}

/// Unconditional retry (every error is treated as transient), still
/// bounded at 4 attempts. Used where the caller has already filtered
/// to a context known to only raise transient errors.
pub async fn retry<F, Fut, T, E>(action: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(action, |_| true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_within_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_if(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_original_error_after_final_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_if(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_if(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |e: &&str| *e != "fatal",
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
