// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Constant-interval polling with an attempt cap
//!
//! The update protocols here are specified as "poll every N seconds, up to
//! M attempts".  That's deliberately not exponential backoff: the remote
//! conditions (a replication chain settling, a database accepting
//! connections) change on their own schedule and the caps are part of each
//! procedure's contract.  Exceeding the cap is fatal to the running plan.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How often to check a condition, and how many times, before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: usize) -> Self {
        PollPolicy { interval, max_attempts }
    }

    /// Upper bound on total time spent waiting (not counting the checks
    /// themselves).
    pub fn max_wait(&self) -> Duration {
        self.interval * u32::try_from(self.max_attempts).unwrap_or(u32::MAX)
    }
}

/// Result of one attempt to check a condition (see [`wait_for()`]).
#[derive(Debug, Error)]
pub enum CondCheckError<E> {
    /// the condition we're waiting for is not true yet
    #[error("poll condition not yet ready")]
    NotYet,
    /// checking the condition failed in a way retrying won't fix
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

/// Result of [`wait_for()`].
#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts ({elapsed:?})")]
    TimedOut { attempts: usize, elapsed: Duration },
    #[error("non-retryable error while polling on condition: {0}")]
    Permanent(E),
}

/// Poll `cond` at `policy.interval` until it succeeds, fails permanently,
/// or `policy.max_attempts` checks have been made.
///
/// The first check happens immediately; the interval elapses between
/// checks, not before the first one.
pub async fn wait_for<O, E, Func, Fut>(
    policy: PollPolicy,
    mut cond: Func,
) -> Result<O, PollError<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
{
    let start = std::time::Instant::now();
    for attempt in 1..=policy.max_attempts {
        match cond().await {
            Ok(output) => return Ok(output),
            Err(CondCheckError::Failed(error)) => {
                return Err(PollError::Permanent(error));
            }
            Err(CondCheckError::NotYet) => (),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(PollError::TimedOut {
        attempts: policy.max_attempts,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_eventually_ready() {
        let count = AtomicUsize::new(0);
        let policy = PollPolicy::new(Duration::from_secs(5), 10);
        let result: Result<usize, PollError<Infallible>> =
            wait_for(policy, || async {
                let n = count.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err(CondCheckError::NotYet) } else { Ok(n) }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let policy = PollPolicy::new(Duration::from_secs(5), 3);
        let result: Result<(), PollError<Infallible>> =
            wait_for(policy, || async {
                Err::<(), _>(CondCheckError::NotYet)
            })
            .await;
        match result {
            Err(PollError::TimedOut { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_permanent_error() {
        let policy = PollPolicy::new(Duration::from_millis(1), 100);
        let result: Result<(), PollError<&str>> =
            wait_for(policy, || async {
                Err::<(), _>(CondCheckError::Failed("broken"))
            })
            .await;
        match result {
            Err(PollError::Permanent(msg)) => assert_eq!(msg, "broken"),
            other => panic!("expected permanent error, got {:?}", other),
        }
    }
}
