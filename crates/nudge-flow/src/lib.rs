//! # nudge-flow
//!
//! Conversation routing for Nudge: the flow controller, the agents it hands
//! messages to, a keyword intent classifier, and a small time-phrase parser.

pub mod agents;
pub mod classifier;
pub mod controller;
pub mod handler;
pub mod session;
pub mod when;

pub use classifier::KeywordClassifier;
pub use controller::{FlowController, Route};
pub use handler::{Handler, Turn};
pub use session::FlowSession;
