//! End-to-end delivery scenarios over an in-memory store and the SQLite queue.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use nudge_core::{
    config::{SchedulerConfig, SweeperConfig},
    conversation::Direction,
    error::NotifyError,
    owner::Owner,
    reminder::{NewReminder, Reminder, ReminderStatus, ReminderTask},
    traits::{Delivery, Notifier},
};
use nudge_scheduler::{
    queue::{QueuedTask, TaskQueue},
    ExecOutcome, Executor, MemoryQueue, RecoverySweeper, ReminderScheduler, RetryPolicy,
    SqliteQueue, WorkerPool,
};
use nudge_store::{CancelOutcome, Store};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Notifier that fails according to a script, then succeeds.
#[derive(Default)]
struct ScriptedNotifier {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<NotifyError>>,
    always_fail: Option<NotifyError>,
}

impl ScriptedNotifier {
    fn failing_first(failures: Vec<NotifyError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Default::default()
        }
    }

    fn always(error: NotifyError) -> Self {
        Self {
            always_fail: Some(error),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _destination: &str, _text: &str) -> Result<Delivery, NotifyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = &self.always_fail {
            return Err(e.clone());
        }
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(Delivery {
            external_message_id: format!("wamid.{n}"),
        })
    }
}

/// Notifier that cancels the reminder while the send is in flight.
struct CancellingNotifier {
    store: Store,
    reminder_id: Mutex<Option<String>>,
}

#[async_trait]
impl Notifier for CancellingNotifier {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn send(&self, _destination: &str, _text: &str) -> Result<Delivery, NotifyError> {
        let id = self.reminder_id.lock().unwrap().clone();
        if let Some(id) = id {
            self.store.cancel_reminder(&id).await.unwrap();
        }
        Ok(Delivery {
            external_message_id: "wamid.race".into(),
        })
    }
}

struct Harness {
    store: Store,
    queue: Arc<dyn TaskQueue>,
    scheduler: ReminderScheduler,
    executor: Arc<Executor>,
    pool: WorkerPool,
    owner: Owner,
}

impl Harness {
    async fn new(notifier: Arc<dyn Notifier>) -> Self {
        let store = Store::open_in_memory().await.unwrap();
        Self::with_store(store, notifier).await
    }

    async fn with_store(store: Store, notifier: Arc<dyn Notifier>) -> Self {
        let config = SchedulerConfig::default();
        let policy = RetryPolicy::from_config(&config);
        let queue: Arc<dyn TaskQueue> =
            Arc::new(SqliteQueue::new(store.pool().clone(), policy).await.unwrap());
        let executor = Arc::new(Executor::new(
            store.clone(),
            notifier,
            policy,
            std::time::Duration::from_secs(5),
        ));
        let pool = WorkerPool::new(queue.clone(), executor.clone(), &config);
        let owner = store.ensure_owner("user1", "15550001111", 0).await.unwrap();
        Self {
            scheduler: ReminderScheduler::new(store.clone(), queue.clone()),
            store,
            queue,
            executor,
            pool,
            owner,
        }
    }

    async fn create(&self, in_secs: i64) -> Reminder {
        self.scheduler
            .create(
                &self.owner,
                NewReminder {
                    owner_id: self.owner.id.clone(),
                    text: "Call John".into(),
                    scheduled_at: Utc::now() + Duration::seconds(in_secs),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn status(&self, id: &str) -> ReminderStatus {
        self.store.get_reminder(id).await.unwrap().unwrap().status
    }
}

#[tokio::test]
async fn test_happy_path() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(2).await;
    assert_eq!(reminder.status, ReminderStatus::Pending);

    // Not due yet.
    let report = h.pool.tick(Utc::now()).await.unwrap();
    assert_eq!(report.processed(), 0);

    let report = h
        .pool
        .tick(Utc::now() + Duration::seconds(3))
        .await
        .unwrap();
    assert_eq!(report.sent, 1);

    let r = h.store.get_reminder(&reminder.id).await.unwrap().unwrap();
    assert_eq!(r.status, ReminderStatus::Sent);
    assert!(r.external_message_id.is_some());
    assert!(r.sent_at.is_some());

    let log = h.store.messages_for_reminder(&reminder.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].direction, Direction::Outbound);
    assert_eq!(log[0].text, "⏰ Reminder: Call John");

    assert!(!h.queue.contains(&reminder.id).await.unwrap());
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn test_retry_then_fail() {
    let notifier = Arc::new(ScriptedNotifier::always(NotifyError::Retryable(
        "downstream 503".into(),
    )));
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    for hour in 1..=3 {
        let report = h
            .pool
            .tick(Utc::now() + Duration::hours(hour))
            .await
            .unwrap();
        assert_eq!(report.processed(), 1, "attempt {hour}");
        if hour < 3 {
            assert_eq!(report.retried, 1);
            assert_eq!(h.status(&reminder.id).await, ReminderStatus::Pending);
        } else {
            assert_eq!(report.failed, 1);
        }
    }

    let r = h.store.get_reminder(&reminder.id).await.unwrap().unwrap();
    assert_eq!(r.status, ReminderStatus::Failed);
    assert!(r
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("downstream 503")));
    assert_eq!(notifier.calls(), 3);

    let dead = h.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key, reminder.id);

    // Nothing left to fire.
    let report = h
        .pool
        .tick(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.processed(), 0);
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let notifier = Arc::new(ScriptedNotifier::failing_first(vec![NotifyError::Retryable(
        "timeout".into(),
    )]));
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    let first = h.pool.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(first.retried, 1);
    let second = h.pool.tick(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(second.sent, 1);
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Sent);
}

#[tokio::test]
async fn test_terminal_failure_fails_immediately() {
    let notifier = Arc::new(ScriptedNotifier::always(NotifyError::Terminal(
        "recipient not on WhatsApp".into(),
    )));
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    let report = h.pool.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.failed, 1);
    let r = h.store.get_reminder(&reminder.id).await.unwrap().unwrap();
    assert_eq!(r.status, ReminderStatus::Failed);
    assert!(r.failure_reason.is_some());
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn test_restart_recovery() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;

    // Stored directly, bypassing the queue, as if created while down.
    let reminder = h
        .store
        .create_reminder(&NewReminder {
            owner_id: h.owner.id.clone(),
            text: "Water the plants".into(),
            scheduled_at: Utc::now() + Duration::seconds(5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!h.queue.contains(&reminder.id).await.unwrap());

    let sweeper = RecoverySweeper::new(h.store.clone(), h.queue.clone(), &SweeperConfig::default());
    let report = sweeper.tick(Utc::now()).await.unwrap();
    assert_eq!(report.scheduled, 1);
    assert!(h.queue.contains(&reminder.id).await.unwrap());

    // A second sweep does not double-schedule.
    let report = sweeper.tick(Utc::now()).await.unwrap();
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.already_queued, 1);

    assert_eq!(h.pool.tick(Utc::now()).await.unwrap().processed(), 0);
    let report = h.pool.tick(Utc::now() + Duration::seconds(6)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Sent);
}

#[tokio::test]
async fn test_sweeper_fails_reminders_without_owner() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier).await;
    let orphan = h
        .store
        .create_reminder(&NewReminder {
            owner_id: "ghost".into(),
            text: "orphan".into(),
            scheduled_at: Utc::now() - Duration::hours(1),
            ..Default::default()
        })
        .await
        .unwrap();
    let good = h
        .store
        .create_reminder(&NewReminder {
            owner_id: h.owner.id.clone(),
            text: "fine".into(),
            scheduled_at: Utc::now() + Duration::seconds(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let sweeper = RecoverySweeper::new(h.store.clone(), h.queue.clone(), &SweeperConfig::default());
    let report = sweeper.tick(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.orphaned, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.scheduled, 1);
    assert!(!h.queue.contains(&orphan.id).await.unwrap());
    assert!(h.queue.contains(&good.id).await.unwrap());

    let failed = h.store.get_reminder(&orphan.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ReminderStatus::Failed);
    assert!(failed.failure_reason.unwrap().contains("ghost"));

    // The orphan no longer occupies the head of the batch.
    let report = sweeper.tick(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.already_queued, 1);
}

#[tokio::test]
async fn test_sweeper_ignores_reminders_beyond_lookahead() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier).await;
    let far = h
        .store
        .create_reminder(&NewReminder {
            owner_id: h.owner.id.clone(),
            text: "next week".into(),
            scheduled_at: Utc::now() + Duration::days(7),
            ..Default::default()
        })
        .await
        .unwrap();

    let sweeper = RecoverySweeper::new(h.store.clone(), h.queue.clone(), &SweeperConfig::default());
    let report = sweeper.tick(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 0);
    assert!(!h.queue.contains(&far.id).await.unwrap());
}

#[tokio::test]
async fn test_at_most_once_under_redelivery() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;
    let task = QueuedTask {
        key: reminder.id.clone(),
        payload: ReminderTask::new(&reminder, &h.owner.destination_address),
        fire_at: reminder.scheduled_at,
        attempts: 1,
        last_error: None,
    };

    let first = h.executor.execute(&task).await.unwrap();
    let second = h.executor.execute(&task).await.unwrap();
    assert!(matches!(first, ExecOutcome::Sent { .. }));
    assert_eq!(
        second,
        ExecOutcome::Skipped {
            status: Some(ReminderStatus::Sent)
        }
    );
    assert_eq!(notifier.calls(), 1);
    assert_eq!(h.store.messages_for_reminder(&reminder.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_at_most_once_with_concurrent_workers() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;
    let task = QueuedTask {
        key: reminder.id.clone(),
        payload: ReminderTask::new(&reminder, &h.owner.destination_address),
        fire_at: reminder.scheduled_at,
        attempts: 1,
        last_error: None,
    };

    let (a, b) = tokio::join!(h.executor.execute(&task), h.executor.execute(&task));
    let sent = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, ExecOutcome::Sent { .. }))
        .count();
    assert_eq!(sent, 1);
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Sent);
    assert_eq!(h.store.messages_for_reminder(&reminder.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lease_expiry_redelivers_once() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    // A worker claims the task and dies without settling it.
    let now = Utc::now() + Duration::seconds(1);
    assert_eq!(h.queue.claim_due(now, 10).await.unwrap().len(), 1);
    assert_eq!(h.pool.tick(now).await.unwrap().processed(), 0);

    let report = h.pool.tick(now + Duration::seconds(121)).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Sent);
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn test_idempotent_scheduling() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;
    let task = ReminderTask::new(&reminder, &h.owner.destination_address);
    h.queue
        .schedule(&reminder.id, &task, reminder.scheduled_at)
        .await
        .unwrap();
    h.queue
        .schedule(&reminder.id, &task, reminder.scheduled_at)
        .await
        .unwrap();
    assert_eq!(h.queue.stats().await.unwrap().waiting, 1);

    let later = Utc::now() + Duration::seconds(1);
    assert_eq!(h.pool.tick(later).await.unwrap().sent, 1);
    assert_eq!(
        h.pool
            .tick(later + Duration::hours(1))
            .await
            .unwrap()
            .processed(),
        0
    );
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn test_cancel_before_fire() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(60).await;

    let outcome = h.scheduler.cancel(&reminder.id, Some("user1")).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert!(!h.queue.contains(&reminder.id).await.unwrap());

    h.pool.tick(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Cancelled);
    assert_eq!(notifier.calls(), 0);
}

#[tokio::test]
async fn test_cancel_after_claim_is_honoured_by_executor() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    let claimed = h
        .queue
        .claim_due(Utc::now() + Duration::seconds(1), 10)
        .await
        .unwrap();
    // The queue no longer lets go of a claimed task; the store does.
    let outcome = h.scheduler.cancel(&reminder.id, None).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    let result = h.executor.execute(&claimed[0]).await.unwrap();
    assert_eq!(
        result,
        ExecOutcome::Skipped {
            status: Some(ReminderStatus::Cancelled)
        }
    );
    assert_eq!(notifier.calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_send_never_marks_sent() {
    let store = Store::open_in_memory().await.unwrap();
    let notifier = Arc::new(CancellingNotifier {
        store: store.clone(),
        reminder_id: Mutex::new(None),
    });
    let h = Harness::with_store(store, notifier.clone()).await;
    let reminder = h.create(0).await;
    *notifier.reminder_id.lock().unwrap() = Some(reminder.id.clone());

    let report = h.pool.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Cancelled);
    assert!(h.store.messages_for_reminder(&reminder.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let store = Store::open_in_memory().await.unwrap();
    let notifier = Arc::new(ScriptedNotifier::default());
    let reminder_id = {
        let h = Harness::with_store(store.clone(), notifier.clone()).await;
        h.create(0).await.id
    };

    // New queue and pool over the same database.
    let h = Harness::with_store(store, notifier.clone()).await;
    assert!(h.queue.contains(&reminder_id).await.unwrap());
    let report = h.pool.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.sent, 1);
}

/// Notifier whose first send blocks until released; later sends go straight
/// through.
struct GatedNotifier {
    calls: AtomicUsize,
    gate: tokio::sync::Semaphore,
}

impl GatedNotifier {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Notifier for GatedNotifier {
    fn name(&self) -> &str {
        "gated"
    }

    async fn send(&self, _destination: &str, _text: &str) -> Result<Delivery, NotifyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| NotifyError::Retryable(e.to_string()))?;
        }
        Ok(Delivery {
            external_message_id: format!("wamid.gated.{n}"),
        })
    }
}

/// Poll `check` every 10ms for up to 3s.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_sweeper_runs_immediately_on_start() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier).await;
    let reminder = h
        .store
        .create_reminder(&NewReminder {
            owner_id: h.owner.id.clone(),
            text: "restart survivor".into(),
            scheduled_at: Utc::now() + Duration::seconds(5),
            ..Default::default()
        })
        .await
        .unwrap();

    let config = SweeperConfig {
        interval_secs: 300,
        ..Default::default()
    };
    let sweeper = RecoverySweeper::new(h.store.clone(), h.queue.clone(), &config);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(sweeper.run(rx));

    // Far sooner than the first interval elapses.
    let queue = &h.queue;
    let id = reminder.id.as_str();
    eventually("first sweep", || async move { queue.contains(id).await.unwrap() }).await;
    assert!(!handle.is_finished());

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(3), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_store_outage_requeues_and_keeps_reminder_pending() {
    let notifier = Arc::new(ScriptedNotifier::default());
    let h = Harness::new(notifier.clone()).await;
    let reminder = h.create(0).await;

    // The executor's store is unreachable.
    let down = Store::open_in_memory().await.unwrap();
    down.pool().close().await;
    let policy = RetryPolicy::default();
    let executor = Arc::new(Executor::new(
        down,
        notifier.clone(),
        policy,
        std::time::Duration::from_secs(5),
    ));
    let queue: Arc<dyn TaskQueue> = Arc::new(MemoryQueue::new(policy));
    queue
        .schedule(
            &reminder.id,
            &ReminderTask::new(&reminder, &h.owner.destination_address),
            reminder.scheduled_at,
        )
        .await
        .unwrap();
    let pool = WorkerPool::new(queue.clone(), executor, &SchedulerConfig::default());

    let now = Utc::now() + Duration::seconds(1);
    let report = pool.tick(now).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(notifier.calls(), 0);

    // Back to waiting, due after the backoff.
    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.waiting, stats.active, stats.failed), (1, 0, 0));
    assert!(queue.claim_due(now, 10).await.unwrap().is_empty());
    let again = queue
        .claim_due(now + policy.backoff(1) + Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].attempts, 2);
    assert!(again[0].last_error.is_some());

    assert_eq!(h.status(&reminder.id).await, ReminderStatus::Pending);
}

#[tokio::test]
async fn test_slow_send_does_not_hold_back_other_tasks() {
    let store = Store::open_in_memory().await.unwrap();
    let notifier = Arc::new(GatedNotifier::new());
    let h = Harness::with_store(store, notifier.clone()).await;
    let config = SchedulerConfig {
        workers: 2,
        poll_interval_ms: 20,
        ..Default::default()
    };
    let pool = WorkerPool::new(h.queue.clone(), h.executor.clone(), &config);
    let (tx, rx) = tokio::sync::watch::channel(false);

    let slow = h.create(-1).await;
    let handle = tokio::spawn(pool.run(rx));
    let gated = notifier.as_ref();
    eventually("slow send to start", || async move {
        gated.calls.load(Ordering::SeqCst) == 1
    })
    .await;

    // Due while the first send is stuck; the idle worker takes it.
    let fast = h.create(-1).await;
    let (harness, fast_id) = (&h, fast.id.as_str());
    eventually("second reminder to be sent", || async move {
        harness.status(fast_id).await == ReminderStatus::Sent
    })
    .await;
    assert_eq!(h.status(&slow.id).await, ReminderStatus::Pending);

    // Shutdown waits for the stuck send.
    tx.send(true).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    notifier.release();
    tokio::time::timeout(std::time::Duration::from_secs(3), handle)
        .await
        .expect("pool did not drain")
        .unwrap();
    assert_eq!(h.status(&slow.id).await, ReminderStatus::Sent);
}
