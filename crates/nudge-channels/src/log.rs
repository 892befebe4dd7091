use async_trait::async_trait;
use nudge_core::{
    error::NotifyError,
    traits::{Delivery, Notifier},
};
use tracing::info;
use uuid::Uuid;

/// Dry-run notifier: logs each message and makes up a message id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, destination_address: &str, text: &str) -> Result<Delivery, NotifyError> {
        let external_message_id = format!("log-{}", Uuid::new_v4());
        info!("notify: [{external_message_id}] to {destination_address}: {text}");
        Ok(Delivery {
            external_message_id,
        })
    }
}
