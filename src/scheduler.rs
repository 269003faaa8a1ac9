//! Execution Scheduler
//!
//! Runs blocking command handlers on a bounded worker pool, separate from
//! the runtime serving inbound messages, with a per-call deadline.
//!
//! A deadline stops the caller from waiting; it never stops the handler.
//! The caller gets a [`PendingReply`] it can hand off to collect the late
//! result.

use anyhow::anyhow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

pub const DEFAULT_WORKERS: usize = 3;

/// Outcome of a scheduled call
#[derive(Debug)]
pub enum Outcome {
    Completed(anyhow::Result<String>),
    /// The deadline passed first; the job is still running
    TimedOut(PendingReply),
}

/// Result of a job that outlived its deadline
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<anyhow::Result<String>>,
}

impl PendingReply {
    /// Wait for the job to finish
    pub async fn wait(self) -> anyhow::Result<String> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("worker dropped the job")),
        }
    }
}

/// Point-in-time pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
}

/// Bounded worker pool with deadlines
#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    permits: Arc<Semaphore>,
    busy: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            busy: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.workers,
            busy: self.busy.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }

    /// Run a job with a deadline that covers queueing and execution
    pub async fn run<F>(&self, job: F, timeout: Duration) -> Outcome
    where
        F: FnOnce() -> anyhow::Result<String> + Send + 'static,
    {
        let (_started, mut result_rx) = self.submit(job);

        match tokio::time::timeout(timeout, &mut result_rx).await {
            Ok(result) => Outcome::Completed(flatten(result)),
            Err(_) => {
                debug!("Job exceeded {}ms deadline", timeout.as_millis());
                Outcome::TimedOut(PendingReply { rx: result_rx })
            }
        }
    }

    /// Run a long job. Waiting for a worker and running are each bounded by
    /// `timeout`, so waiting behind other slow jobs does not eat into the
    /// execution budget.
    pub async fn run_long<F>(&self, job: F, timeout: Duration) -> Outcome
    where
        F: FnOnce() -> anyhow::Result<String> + Send + 'static,
    {
        let (started, mut result_rx) = self.submit(job);

        match tokio::time::timeout(timeout, started).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // The job never started; the result channel carries the reason
                return Outcome::Completed(flatten(result_rx.await));
            }
            Err(_) => {
                debug!("Long job waited {}ms without a worker", timeout.as_millis());
                return Outcome::TimedOut(PendingReply { rx: result_rx });
            }
        }

        match tokio::time::timeout(timeout, &mut result_rx).await {
            Ok(result) => Outcome::Completed(flatten(result)),
            Err(_) => {
                debug!("Long job exceeded {}ms after start", timeout.as_millis());
                Outcome::TimedOut(PendingReply { rx: result_rx })
            }
        }
    }

    fn submit<F>(
        &self,
        job: F,
    ) -> (
        oneshot::Receiver<()>,
        oneshot::Receiver<anyhow::Result<String>>,
    )
    where
        F: FnOnce() -> anyhow::Result<String> + Send + 'static,
    {
        let (started_tx, started_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();

        let permits = Arc::clone(&self.permits);
        let busy = Arc::clone(&self.busy);
        let queued = Arc::clone(&self.queued);
        queued.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let permit = permits.acquire_owned().await;
            queued.fetch_sub(1, Ordering::Relaxed);
            let _permit = match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = result_tx.send(Err(anyhow!("worker pool closed")));
                    return;
                }
            };

            busy.fetch_add(1, Ordering::Relaxed);
            let _ = started_tx.send(());

            let result = match tokio::task::spawn_blocking(job).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    warn!("Command handler panicked");
                    Err(anyhow!("handler panicked"))
                }
                Err(e) => Err(anyhow!("handler task failed: {}", e)),
            };
            busy.fetch_sub(1, Ordering::Relaxed);

            // The receiver is gone when nobody waits for a late result
            let _ = result_tx.send(result);
        });

        (started_rx, result_rx)
    }
}

fn flatten(
    received: Result<anyhow::Result<String>, oneshot::error::RecvError>,
) -> anyhow::Result<String> {
    received.unwrap_or_else(|_| Err(anyhow!("worker dropped the job")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn sleepy(ms: u64, reply: &'static str) -> impl FnOnce() -> anyhow::Result<String> + Send {
        move || {
            thread::sleep(Duration::from_millis(ms));
            Ok(reply.to_string())
        }
    }

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let scheduler = Scheduler::new(2);
        match scheduler.run(sleepy(10, "done"), Duration::from_secs(2)).await {
            Outcome::Completed(Ok(reply)) => assert_eq!(reply, "done"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_keeps_job_running() {
        let scheduler = Scheduler::new(1);
        let start = Instant::now();

        let pending = match scheduler.run(sleepy(300, "late"), Duration::from_millis(50)).await {
            Outcome::TimedOut(pending) => pending,
            other => panic!("expected timeout, got {:?}", other),
        };
        assert!(start.elapsed() < Duration::from_millis(250));

        assert_eq!(pending.wait().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_handler_error_and_panic() {
        let scheduler = Scheduler::default();

        let outcome = scheduler
            .run(|| Err(anyhow!("upstream 503")), Duration::from_secs(1))
            .await;
        match outcome {
            Outcome::Completed(Err(e)) => assert_eq!(e.to_string(), "upstream 503"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome = scheduler
            .run(|| panic!("scraper blew up"), Duration::from_secs(1))
            .await;
        match outcome {
            Outcome::Completed(Err(e)) => assert_eq!(e.to_string(), "handler panicked"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Pool is still usable
        assert!(matches!(
            scheduler.run(sleepy(1, "ok"), Duration::from_secs(1)).await,
            Outcome::Completed(Ok(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_wait_counts_against_normal_deadline() {
        let scheduler = Scheduler::new(1);
        let blocker = scheduler.clone();
        let slow = tokio::spawn(async move {
            blocker.run(sleepy(400, "slow"), Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = scheduler.run(sleepy(10, "fast"), Duration::from_millis(150)).await;
        assert!(matches!(outcome, Outcome::TimedOut(_)));
        assert!(matches!(slow.await.unwrap(), Outcome::Completed(Ok(_))));
    }

    #[tokio::test]
    async fn test_long_budget_starts_at_pickup() {
        let scheduler = Scheduler::new(1);
        let blocker = scheduler.clone();
        let slow = tokio::spawn(async move {
            blocker.run(sleepy(250, "slow"), Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.stats().busy, 1);

        // ~200ms queued plus 200ms running: over budget in total, within it each
        let outcome = scheduler
            .run_long(sleepy(200, "fast"), Duration::from_millis(300))
            .await;
        match outcome {
            Outcome::Completed(Ok(reply)) => assert_eq!(reply, "fast"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_long_job_pickup_wait_is_bounded() {
        let scheduler = Scheduler::new(1);
        let blocker = scheduler.clone();
        let slow = tokio::spawn(async move {
            blocker.run(sleepy(600, "slow"), Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        let outcome = scheduler
            .run_long(sleepy(10, "queued"), Duration::from_millis(150))
            .await;
        assert!(start.elapsed() < Duration::from_millis(400));
        let Outcome::TimedOut(pending) = outcome else {
            panic!("expected timeout while queued");
        };

        // Still runs once the worker frees up
        assert_eq!(pending.wait().await.unwrap(), "queued");
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_long_job_still_times_out() {
        let scheduler = Scheduler::new(1);
        let outcome = scheduler
            .run_long(sleepy(300, "late"), Duration::from_millis(50))
            .await;
        let Outcome::TimedOut(pending) = outcome else {
            panic!("expected timeout");
        };
        assert_eq!(pending.wait().await.unwrap(), "late");
        assert_eq!(scheduler.stats(), SchedulerStats { workers: 1, busy: 0, queued: 0 });
    }
}
