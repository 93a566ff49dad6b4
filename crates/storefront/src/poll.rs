//! Background status polling.
//!
//! A poller calls a fetch function on a fixed interval and forwards every
//! result over a channel until a terminal value arrives or the handle is
//! dropped. Dropping the [`PollHandle`] aborts the task, so at most one
//! poller per handle is ever alive.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Owner of a running poller.
#[derive(Debug)]
pub struct PollHandle<T> {
    task: JoinHandle<()>,
    updates: mpsc::Receiver<T>,
}

impl<T> PollHandle<T> {
    /// Wait for the next polled value. `None` once polling has stopped and
    /// every value has been received.
    pub async fn next(&mut self) -> Option<T> {
        self.updates.recv().await
    }

    /// Whether the polling task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start polling `fetch` every `interval`, the first call one interval from
/// now. Fetch errors are logged and retried on the next tick.
pub fn spawn_poller<T, E, F, Fut>(
    name: &'static str,
    interval: Duration,
    mut fetch: F,
    is_terminal: fn(&T) -> bool,
) -> PollHandle<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send,
{
    let (tx, updates) = mpsc::channel(8);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match fetch().await {
                Ok(value) => {
                    let done = is_terminal(&value);
                    if tx.send(value).await.is_err() {
                        debug!(poller = name, "receiver dropped, stopping");
                        break;
                    }
                    if done {
                        debug!(poller = name, "terminal status reached");
                        break;
                    }
                }
                Err(e) => warn!(poller = name, error = %e, "status poll failed, retrying"),
            }
        }
    });

    PollHandle { task, updates }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut handle = spawn_poller(
            "test",
            Duration::from_secs(10),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<u32, ApiError>(n) }
            },
            |n| *n >= 3,
        );

        assert_eq!(handle.next().await, Some(1));
        assert_eq!(handle.next().await, Some(2));
        assert_eq!(handle.next().await, Some(3));
        assert_eq!(handle.next().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_one_interval() {
        let start = Instant::now();
        let mut handle = spawn_poller(
            "test",
            Duration::from_secs(10),
            || async { Ok::<bool, ApiError>(true) },
            |done| *done,
        );
        assert_eq!(handle.next().await, Some(true));
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut handle = spawn_poller(
            "test",
            Duration::from_secs(5),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiError::RateLimited(1))
                    } else {
                        Ok("approved")
                    }
                }
            },
            |_| true,
        );
        assert_eq!(handle.next().await, Some("approved"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handle = spawn_poller(
            "test",
            Duration::from_secs(1),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, ApiError>(0) }
            },
            |_| false,
        );
        drop(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
