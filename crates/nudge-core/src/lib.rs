//! # nudge-core
//!
//! Core types, traits, configuration, and error handling for Nudge.

pub mod config;
pub mod conversation;
pub mod error;
pub mod flow;
pub mod message;
pub mod owner;
pub mod reminder;
pub mod traits;

pub use config::shellexpand;
