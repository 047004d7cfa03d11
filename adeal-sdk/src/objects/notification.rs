//! Notification payloads delivered through the outbox.
//!
//! One variant per event kind, each carrying only what its message needs.
//! Consumers must tolerate duplicates: delivery is at-least-once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deal::DealStatus;
use super::ton::TonAmount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Notification {
    ProposalReceived {
        deal_id: Uuid,
        price: TonAmount,
    },
    ProposalAccepted {
        deal_id: Uuid,
        price: TonAmount,
    },
    ProposalRejected {
        deal_id: Uuid,
        reason: Option<String>,
    },
    PaymentReceived {
        deal_id: Uuid,
        amount: TonAmount,
        tx_hash: String,
    },
    CreativeSubmitted {
        deal_id: Uuid,
    },
    CreativeApproved {
        deal_id: Uuid,
    },
    CreativeEditsRequested {
        deal_id: Uuid,
        reason: String,
    },
    PostScheduled {
        deal_id: Uuid,
        scheduled_at: i64,
    },
    PostPublished {
        deal_id: Uuid,
        message_id: i64,
    },
    PostVerified {
        deal_id: Uuid,
    },
    FundsReleased {
        deal_id: Uuid,
        amount: TonAmount,
    },
    FundsRefunded {
        deal_id: Uuid,
        amount: TonAmount,
    },
    DealCreated {
        deal_id: Uuid,
        price: TonAmount,
    },
    DealCancelled {
        deal_id: Uuid,
        reason: Option<String>,
    },
    DealExpired {
        deal_id: Uuid,
        previous_status: DealStatus,
    },
}

impl Notification {
    /// The `event_type` tag, also stored as the outbox message type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::ProposalReceived { .. } => "proposal_received",
            Notification::ProposalAccepted { .. } => "proposal_accepted",
            Notification::ProposalRejected { .. } => "proposal_rejected",
            Notification::PaymentReceived { .. } => "payment_received",
            Notification::CreativeSubmitted { .. } => "creative_submitted",
            Notification::CreativeApproved { .. } => "creative_approved",
            Notification::CreativeEditsRequested { .. } => "creative_edits_requested",
            Notification::PostScheduled { .. } => "post_scheduled",
            Notification::PostPublished { .. } => "post_published",
            Notification::PostVerified { .. } => "post_verified",
            Notification::FundsReleased { .. } => "funds_released",
            Notification::FundsRefunded { .. } => "funds_refunded",
            Notification::DealCreated { .. } => "deal_created",
            Notification::DealCancelled { .. } => "deal_cancelled",
            Notification::DealExpired { .. } => "deal_expired",
        }
    }

    pub fn deal_id(&self) -> Uuid {
        match self {
            Notification::ProposalReceived { deal_id, .. }
            | Notification::ProposalAccepted { deal_id, .. }
            | Notification::ProposalRejected { deal_id, .. }
            | Notification::PaymentReceived { deal_id, .. }
            | Notification::CreativeSubmitted { deal_id }
            | Notification::CreativeApproved { deal_id }
            | Notification::CreativeEditsRequested { deal_id, .. }
            | Notification::PostScheduled { deal_id, .. }
            | Notification::PostPublished { deal_id, .. }
            | Notification::PostVerified { deal_id }
            | Notification::FundsReleased { deal_id, .. }
            | Notification::FundsRefunded { deal_id, .. }
            | Notification::DealCreated { deal_id, .. }
            | Notification::DealCancelled { deal_id, .. }
            | Notification::DealExpired { deal_id, .. } => *deal_id,
        }
    }
}

/// A notification addressed to one Telegram chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEnvelope {
    pub recipient_chat_id: i64,
    pub notification: Notification,
}

impl OutboxEnvelope {
    pub fn new(recipient_chat_id: i64, notification: Notification) -> Self {
        Self {
            recipient_chat_id,
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_tag_matches_event_type() {
        let deal_id = Uuid::nil();
        let notification = Notification::FundsReleased {
            deal_id,
            amount: TonAmount::new(Decimal::from(10)).unwrap(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event_type"], notification.event_type());
        assert_eq!(json["amount"], "10");
    }

    #[test]
    fn test_envelope_parses_back() {
        let envelope = OutboxEnvelope::new(
            42,
            Notification::DealExpired {
                deal_id: Uuid::nil(),
                previous_status: DealStatus::AwaitingPayment,
            },
        );
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"previous_status\":\"awaiting_payment\""));
        let parsed: OutboxEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
