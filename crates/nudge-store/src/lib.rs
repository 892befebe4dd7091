//! # nudge-store
//!
//! Durable storage for Nudge (SQLite-backed): owners, reminders,
//! per-user conversation state, and the append-only conversation log.

pub mod store;
pub mod timestamp;

pub use store::{CancelOutcome, Store};
