//! Bounded worker pool draining the task queue.

use crate::executor::{ExecOutcome, Executor};
use crate::queue::{QueuedTask, RetryOutcome, TaskQueue};
use crate::rate_limit::RateLimiter;
use chrono::{DateTime, Utc};
use nudge_core::{config::SchedulerConfig, error::NudgeError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Claims due tasks and runs them on at most `workers` concurrent executors,
/// each send gated by a shared rate limiter. Idle workers are refilled as
/// soon as a send settles.
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    executor: Arc<Executor>,
    limiter: Arc<RateLimiter>,
    permits: Arc<Semaphore>,
    workers: usize,
    poll_interval: Duration,
}

/// Per-tick tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
    pub errors: usize,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.sent + self.skipped + self.retried + self.failed + self.errors
    }

    fn add(&mut self, other: TickReport) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.failed += other.failed;
        self.errors += other.errors;
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        executor: Arc<Executor>,
        config: &SchedulerConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        Self {
            queue,
            executor,
            limiter: Arc::new(RateLimiter::per_second(config.max_sends_per_second)),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            poll_interval: config.poll_interval(),
        }
    }

    /// Claim as many due tasks as there are idle workers and start them in
    /// `in_flight`. Returns how many were started.
    async fn dispatch(
        &self,
        now: DateTime<Utc>,
        in_flight: &mut JoinSet<TickReport>,
    ) -> Result<usize, NudgeError> {
        let idle = self.permits.available_permits();
        if idle == 0 {
            return Ok(0);
        }
        let tasks = self.queue.claim_due(now, idle).await?;
        if tasks.is_empty() {
            return Ok(0);
        }
        debug!("scheduler: claimed {} task(s)", tasks.len());

        let started = tasks.len();
        for task in tasks {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| NudgeError::Queue(format!("worker pool closed: {e}")))?;
            let queue = self.queue.clone();
            let executor = self.executor.clone();
            let limiter = self.limiter.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                limiter.acquire().await;
                process(queue.as_ref(), &executor, task, now).await
            });
        }
        Ok(started)
    }

    /// Claim what is due at `now` and process it, waiting for every claimed
    /// task to finish.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, NudgeError> {
        let mut in_flight = JoinSet::new();
        self.dispatch(now, &mut in_flight).await?;

        let mut report = TickReport::default();
        while let Some(joined) = in_flight.join_next().await {
            collect(&mut report, joined);
        }
        Ok(report)
    }

    /// Poll until `shutdown` flips to `true`. A worker that finishes takes the
    /// next due task right away, so one slow send holds only its own slot.
    /// Every in-flight send completes before this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "scheduler: {} worker(s) polling every {}ms",
            self.workers,
            self.poll_interval.as_millis()
        );
        let mut in_flight = JoinSet::new();
        let mut report = TickReport::default();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.dispatch(Utc::now(), &mut in_flight).await {
                error!("scheduler: dispatch failed: {e}");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    collect(&mut report, joined);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!("scheduler: waiting for {} in-flight send(s)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            collect(&mut report, joined);
        }
        info!(
            "scheduler: stopped | sent={} skipped={} retried={} failed={} errors={}",
            report.sent, report.skipped, report.retried, report.failed, report.errors
        );
    }
}

fn collect(report: &mut TickReport, joined: Result<TickReport, JoinError>) {
    match joined {
        Ok(r) => report.add(r),
        Err(e) => {
            error!("scheduler: worker task panicked: {e}");
            report.errors += 1;
        }
    }
}

/// Run one task and settle it in the queue.
async fn process(
    queue: &dyn TaskQueue,
    executor: &Executor,
    task: QueuedTask,
    now: DateTime<Utc>,
) -> TickReport {
    let mut report = TickReport::default();
    let key = task.key.clone();

    let settled = match executor.execute(&task).await {
        Ok(ExecOutcome::Sent { .. }) => {
            report.sent += 1;
            queue.ack(&key).await
        }
        Ok(ExecOutcome::Skipped { .. }) => {
            report.skipped += 1;
            queue.ack(&key).await
        }
        Ok(ExecOutcome::Failed { reason }) => {
            report.failed += 1;
            queue.bury(&key, &reason).await
        }
        Ok(ExecOutcome::Retry { reason }) => {
            report.retried += 1;
            requeue(queue, &key, &reason, now).await
        }
        Err(e) => {
            warn!("scheduler: {key} attempt {} errored: {e}", task.attempts);
            report.errors += 1;
            requeue(queue, &key, &e.to_string(), now).await
        }
    };

    if let Err(e) = settled {
        // The lease will expire and the task comes back.
        error!("scheduler: failed to settle {key}: {e}");
    }
    report
}

async fn requeue(
    queue: &dyn TaskQueue,
    key: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), NudgeError> {
    match queue.retry(key, reason, now).await? {
        RetryOutcome::Rescheduled(at) => debug!("scheduler: {key} retries at {at}"),
        RetryOutcome::Buried => warn!("scheduler: {key} moved to the dead lane"),
        RetryOutcome::Missing => warn!("scheduler: {key} vanished before retry"),
    }
    Ok(())
}
