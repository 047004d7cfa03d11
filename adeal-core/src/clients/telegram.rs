//! Telegram Bot API: channel publishing and party notifications.

use crate::config::TelegramConfig;
use adeal_sdk::objects::{Notification, OutboxEnvelope};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Api(String),
}

/// Posting into and removing from channels.
#[async_trait]
pub trait ChannelMessenger: Send + Sync {
    /// Returns the id of the published message.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, MessengerError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError>;

    async fn send_video(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError>;

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), MessengerError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error("undeliverable payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Delivers one outbox envelope to its recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, envelope: &OutboxEnvelope) -> Result<(), NotifyError>;
}

/// Human-readable text for a notification.
pub fn render(notification: &Notification) -> String {
    match notification {
        Notification::ProposalReceived { deal_id, price } => {
            format!("New ad proposal for {price} (deal {deal_id}).")
        }
        Notification::ProposalAccepted { deal_id, price } => {
            format!("Your proposal for {price} was accepted (deal {deal_id}).")
        }
        Notification::ProposalRejected { deal_id, reason } => match reason {
            Some(reason) => format!("Your proposal was declined (deal {deal_id}): {reason}"),
            None => format!("Your proposal was declined (deal {deal_id})."),
        },
        Notification::PaymentReceived {
            deal_id,
            amount,
            tx_hash,
        } => format!("Payment of {amount} received for deal {deal_id} (tx {tx_hash})."),
        Notification::CreativeSubmitted { deal_id } => {
            format!("A creative was submitted for review (deal {deal_id}).")
        }
        Notification::CreativeApproved { deal_id } => {
            format!("Your creative was approved (deal {deal_id}).")
        }
        Notification::CreativeEditsRequested { deal_id, reason } => {
            format!("Edits requested for deal {deal_id}: {reason}")
        }
        Notification::PostScheduled {
            deal_id,
            scheduled_at,
        } => match time::OffsetDateTime::from_unix_timestamp(*scheduled_at) {
            Ok(at) => format!("Post for deal {deal_id} is scheduled at {at}."),
            Err(_) => format!("Post for deal {deal_id} is scheduled."),
        },
        Notification::PostPublished {
            deal_id,
            message_id,
        } => format!("Post for deal {deal_id} is live (message {message_id})."),
        Notification::PostVerified { deal_id } => {
            format!("The campaign for deal {deal_id} has completed.")
        }
        Notification::FundsReleased { deal_id, amount } => {
            format!("{amount} released to your balance (deal {deal_id}).")
        }
        Notification::FundsRefunded { deal_id, amount } => {
            format!("{amount} refunded for deal {deal_id}.")
        }
        Notification::DealCreated { deal_id, price } => {
            format!("Deal {deal_id} created for {price}. Awaiting payment request.")
        }
        Notification::DealCancelled { deal_id, reason } => match reason {
            Some(reason) => format!("Deal {deal_id} was cancelled: {reason}"),
            None => format!("Deal {deal_id} was cancelled."),
        },
        Notification::DealExpired {
            deal_id,
            previous_status,
        } => format!("Deal {deal_id} expired while {previous_status}."),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramBot {
    base_url: String,
    http_client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> Self {
        let api_url = config.api_url.as_str().trim_end_matches('/');
        Self {
            base_url: format!("{api_url}/bot{}", config.bot_token),
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, MessengerError> {
        // The request URL carries the bot token; keep it out of error text.
        let response: ApiResponse<T> = self
            .http_client
            .post(format!("{}/{method}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?
            .json()
            .await
            .map_err(reqwest::Error::without_url)?;
        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(MessengerError::Api(
                description.unwrap_or_else(|| format!("{method} failed")),
            )),
        }
    }

    async fn send_media(
        &self,
        method: &str,
        field: &str,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        let mut body = json!({ "chat_id": chat_id });
        body[field] = json!(file_id);
        if let Some(caption) = caption {
            body["caption"] = json!(caption);
        }
        let sent: SentMessage = self.call(method, body).await?;
        Ok(sent.message_id)
    }
}

#[async_trait]
impl ChannelMessenger for TelegramBot {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, MessengerError> {
        let sent: SentMessage = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(sent.message_id)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.send_media("sendPhoto", "photo", chat_id, file_id, caption)
            .await
    }

    async fn send_video(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.send_media("sendVideo", "video", chat_id, file_id, caption)
            .await
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<i64, MessengerError> {
        self.send_media("sendDocument", "document", chat_id, file_id, caption)
            .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), MessengerError> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn deliver(&self, envelope: &OutboxEnvelope) -> Result<(), NotifyError> {
        let text = render(&envelope.notification);
        self.send_message(envelope.recipient_chat_id, &text).await?;
        Ok(())
    }
}
