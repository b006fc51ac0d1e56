//! Timeout enforcement.
//!
//! Backend calls made on behalf of a borrower are bounded twice: by their own
//! operation timeout and by the borrower's deadline. Which bound fired matters:
//! an elapsed deadline is a pool-exhaustion condition for the caller, an
//! elapsed operation timeout is a backend failure.

use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Which bound cut the operation short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expired {
    /// The caller's deadline passed.
    Deadline,
    /// The operation's own timeout passed first.
    Operation,
}

/// Run `fut` until it completes, `limit` elapses, or `deadline` passes.
pub async fn within_deadline<F>(deadline: Instant, limit: Duration, fut: F) -> Result<F::Output, Expired>
where
    F: Future,
{
    let op_deadline = Instant::now() + limit;
    if op_deadline < deadline {
        timeout_at(op_deadline, fut).await.map_err(|_| Expired::Operation)
    } else {
        timeout_at(deadline, fut).await.map_err(|_| Expired::Deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_bounds() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let out = within_deadline(deadline, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn reports_the_bound_that_fired() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            within_deadline(deadline, Duration::from_secs(1), slow).await,
            Err(Expired::Deadline)
        );

        let slow = tokio::time::sleep(Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            within_deadline(deadline, Duration::from_millis(20), slow).await,
            Err(Expired::Operation)
        );
    }
}
