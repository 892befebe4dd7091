//! # nudge-scheduler
//!
//! Durable delayed delivery of reminders.
//!
//! - [`queue`]: the `TaskQueue` contract with in-memory and SQLite backings
//! - [`executor`]: re-validates a due reminder and hands it to the notifier
//! - [`worker`]: bounded, rate-limited pool that drains the queue
//! - [`sweeper`]: periodic reconciliation between the store and the queue
//! - [`reminders`]: create/cancel entry points that keep store and queue in step

pub mod executor;
pub mod queue;
pub mod rate_limit;
pub mod reminders;
pub mod sweeper;
pub mod worker;

pub use executor::{ExecOutcome, Executor};
pub use queue::{memory::MemoryQueue, sqlite::SqliteQueue, RetryPolicy, TaskQueue};
pub use reminders::ReminderScheduler;
pub use sweeper::RecoverySweeper;
pub use worker::WorkerPool;
