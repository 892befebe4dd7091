//! # nudge-channels
//!
//! Notifier backends that deliver reminders to owners.

pub mod log;
pub mod whatsapp;

use nudge_core::{
    config::{NotifierConfig, NotifierKind},
    error::NudgeError,
    traits::Notifier,
};
use std::sync::Arc;

pub use log::LogNotifier;
pub use whatsapp::WhatsAppNotifier;

/// Build the notifier selected by `config.kind`.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NudgeError> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Whatsapp => {
            let whatsapp = config.whatsapp.as_ref().ok_or_else(|| {
                NudgeError::Config("notifier.kind is whatsapp but [notifier.whatsapp] is missing".into())
            })?;
            Ok(Arc::new(WhatsAppNotifier::new(whatsapp, config.timeout())?))
        }
    }
}
