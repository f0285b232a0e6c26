//! Bounding a single external call in time

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A wrapped call ran past its budget
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} timed out after {} ms", .after.as_millis())]
pub struct TimedOut {
    pub operation: String,
    pub after: Duration,
}

/// Run `future` for at most `duration`
///
/// The future is dropped when the budget runs out. Siblings running next to it
/// are not touched.
pub async fn with_timeout<F>(
    operation: impl Into<String>,
    duration: Duration,
    future: F,
) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimedOut {
            operation: operation.into(),
            after: duration,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_in_time() {
        let value = with_timeout("quick", Duration::from_millis(200), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let result = with_timeout("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            1
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.after, Duration::from_millis(50));
        assert_eq!(err.to_string(), "slow timed out after 50 ms");
    }
}
