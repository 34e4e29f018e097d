use std::time::Duration;

/// Retry an async operation a fixed number of times with linear backoff:
/// the n-th failure sleeps `base_delay * n` before the next attempt.
/// The first success short-circuits; exhaustion returns the last error.
///
/// This is the single retry policy for every network step in the pipeline
/// (sandbox startup, snapshot, broadcast, mining, receipt polling).
pub async fn with_retries<F, Fut, T, E>(
    label: &str,
    attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    debug_assert!(attempts > 0);

    let mut last_err = None;
    for attempt in 1..=attempts {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    step = label,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Retryable step failed"
                );
                last_err = Some(format!("{e}"));
                if attempt < attempts {
                    tokio::time::sleep(base_delay * attempt).await;
                }
            }
        }
    }

    Err(eyre::eyre!(
        "{} failed after {} attempts: {}",
        label,
        attempts,
        last_err.unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let calls = AtomicU32::new(0);
        let result = with_retries("op", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries("op", 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: eyre::Result<()> = with_retries("doomed", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        })
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("doomed"));
        assert!(err.contains("3 attempts"));
        assert!(err.contains("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
