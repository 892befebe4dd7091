//! Process wiring: one store, one queue, and the components built on them.

use nudge_channels::build_notifier;
use nudge_core::{config::Config, error::NudgeError};
use nudge_flow::{FlowController, KeywordClassifier};
use nudge_scheduler::{
    Executor, RecoverySweeper, ReminderScheduler, RetryPolicy, SqliteQueue, WorkerPool,
};
use nudge_store::Store;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Handles shared by every command. Built once at startup and passed down.
pub struct Engine {
    pub config: Config,
    pub store: Store,
    pub queue: Arc<SqliteQueue>,
    pub scheduler: ReminderScheduler,
    pub flow: Arc<FlowController>,
}

impl Engine {
    pub async fn open(config: Config) -> Result<Self, NudgeError> {
        let store = Store::new(&config.store).await?;
        let policy = RetryPolicy::from_config(&config.scheduler);
        let queue = Arc::new(SqliteQueue::new(store.pool().clone(), policy).await?);
        let scheduler = ReminderScheduler::new(store.clone(), queue.clone());
        let flow = Arc::new(FlowController::new(
            scheduler.clone(),
            Arc::new(KeywordClassifier),
            config.flow.clone(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            scheduler,
            flow,
        })
    }

    /// Run the sweeper and the worker pool until Ctrl-C, then let in-flight
    /// sends finish.
    pub async fn run(self) -> anyhow::Result<()> {
        let notifier = build_notifier(&self.config.notifier)?;
        let executor = Arc::new(Executor::new(
            self.store.clone(),
            notifier.clone(),
            RetryPolicy::from_config(&self.config.scheduler),
            self.config.notifier.timeout(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        if self.config.sweeper.enabled {
            let sweeper =
                RecoverySweeper::new(self.store.clone(), self.queue.clone(), &self.config.sweeper);
            handles.push(tokio::spawn(sweeper.run(shutdown_rx.clone())));
        } else {
            warn!("sweeper disabled: reminders lost from the queue will not be re-admitted");
        }

        if self.config.scheduler.enabled {
            let pool = WorkerPool::new(self.queue.clone(), executor, &self.config.scheduler);
            handles.push(tokio::spawn(pool.run(shutdown_rx.clone())));
        } else {
            warn!("scheduler disabled: no reminders will be sent");
        }
        drop(shutdown_rx);

        info!(
            "Nudge running | notifier: {} | workers: {} | max sends/s: {}",
            notifier.name(),
            self.config.scheduler.workers,
            self.config.scheduler.max_sends_per_second,
        );

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        if shutdown_tx.send(true).is_err() {
            warn!("no background task was listening for shutdown");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("background task ended abnormally: {e}");
            }
        }
        self.store.pool().close().await;
        info!("Nudge stopped");
        Ok(())
    }
}
