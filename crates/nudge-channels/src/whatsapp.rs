//! WhatsApp Cloud API notifier.
//!
//! Sends plain text messages through `POST /{phone_number_id}/messages`.
//! Docs: <https://developers.facebook.com/docs/whatsapp/cloud-api/reference/messages>


use async_trait::async_trait;
use nudge_core::{
    config::WhatsAppConfig,
    error::{NotifyError, NudgeError},
    traits::{Delivery, Notifier},
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body carried into a failure reason.
const MAX_REASON_LEN: usize = 200;

/// Prefix of the id recorded when an accepted send reports no message id.
/// Delivery receipts never match it.
pub const UNCONFIRMED_PREFIX: &str = "unconfirmed-";

pub struct WhatsAppNotifier {
    client: reqwest::Client,
    messages_url: String,
    access_token: String,
}

// --- Cloud API types ---

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

impl WhatsAppNotifier {
    /// Every request is bounded by `timeout`.
    pub fn new(config: &WhatsAppConfig, timeout: Duration) -> Result<Self, NudgeError> {
        if config.access_token.is_empty() || config.phone_number_id.is_empty() {
            return Err(NudgeError::Config(
                "whatsapp notifier needs access_token and phone_number_id".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NudgeError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.api_base.trim_end_matches('/'),
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
        })
    }
}

/// Throttling, timeouts, and server errors may succeed later. Any other
/// rejection will not.
fn classify(status: StatusCode, reason: String) -> NotifyError {
    let reason = format!("whatsapp {status}: {reason}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        NotifyError::Retryable(reason)
    } else {
        NotifyError::Terminal(reason)
    }
}

fn error_reason(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => match parsed.error.code {
            Some(code) => format!("{} (code {code})", parsed.error.message),
            None => parsed.error.message,
        },
        Err(_) => body.chars().take(MAX_REASON_LEN).collect(),
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, destination_address: &str, text: &str) -> Result<Delivery, NotifyError> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": destination_address,
            "type": "text",
            "text": { "preview_url": false, "body": text },
        });

        let resp = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Retryable(format!("whatsapp request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let err = classify(status, error_reason(&error_text));
            warn!("whatsapp send to {destination_address} failed: {err}");
            return Err(err);
        }

        // The message is out at this point; a retry would send it twice. An
        // unreadable reply still counts as sent, under a local id.
        let id = match resp.json::<SendResponse>().await {
            Ok(parsed) => parsed.messages.into_iter().next().map(|m| m.id),
            Err(e) => {
                warn!(
                    "whatsapp accepted a message to {destination_address} \
                     but the reply was unreadable: {e}"
                );
                None
            }
        };
        let id = id.unwrap_or_else(|| {
            let local = format!("{UNCONFIRMED_PREFIX}{}", uuid::Uuid::new_v4());
            warn!("whatsapp reply carried no message id, recording {local}");
            local
        });

        debug!("whatsapp sent {id} to {destination_address}");
        Ok(Delivery {
            external_message_id: id,
        })
    }
}
