//! Deal status and event vocabulary for API responses.
//!
//! These are the DTO versions without sqlx::Type.
//! For database operations, use the versions in `adeal-core::entities`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Agreed,
    AwaitingPayment,
    Paid,
    CreativeDraft,
    CreativeReview,
    Scheduled,
    Posted,
    Verified,
    Released,
    Refunded,
    Cancelled,
    Expired,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Agreed => "agreed",
            DealStatus::AwaitingPayment => "awaiting_payment",
            DealStatus::Paid => "paid",
            DealStatus::CreativeDraft => "creative_draft",
            DealStatus::CreativeReview => "creative_review",
            DealStatus::Scheduled => "scheduled",
            DealStatus::Posted => "posted",
            DealStatus::Verified => "verified",
            DealStatus::Released => "released",
            DealStatus::Refunded => "refunded",
            DealStatus::Cancelled => "cancelled",
            DealStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealEventKind {
    ProposalAccepted,
    ProposalRejected,
    PaymentRequested,
    PaymentConfirmed,
    CreativeSubmitted,
    CreativeApproved,
    CreativeRejected,
    Posted,
    Verified,
    Released,
    Refunded,
    Cancelled,
    Expired,
}

impl std::fmt::Display for DealEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DealEventKind::ProposalAccepted => "proposal_accepted",
            DealEventKind::ProposalRejected => "proposal_rejected",
            DealEventKind::PaymentRequested => "payment_requested",
            DealEventKind::PaymentConfirmed => "payment_confirmed",
            DealEventKind::CreativeSubmitted => "creative_submitted",
            DealEventKind::CreativeApproved => "creative_approved",
            DealEventKind::CreativeRejected => "creative_rejected",
            DealEventKind::Posted => "posted",
            DealEventKind::Verified => "verified",
            DealEventKind::Released => "released",
            DealEventKind::Refunded => "refunded",
            DealEventKind::Cancelled => "cancelled",
            DealEventKind::Expired => "expired",
        };
        f.write_str(s)
    }
}
