//! Deal lifecycle transition table.
//!
//! Pure and stateless. Time-based transitions are driven from outside by the
//! reconcilers; this module only answers whether a move is legal.

use crate::entities::DealStatus;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Fatal to the operation: abort the unit of work, never retry.
    #[error("invalid deal transition from {from} to {to}")]
    InvalidTransition { from: DealStatus, to: DealStatus },
}

impl DealStatus {
    /// Statuses reachable from `self` in one step.
    pub fn allowed_transitions(self) -> &'static [DealStatus] {
        use DealStatus::*;
        match self {
            Agreed => &[AwaitingPayment, Cancelled, Expired],
            AwaitingPayment => &[Paid, Cancelled, Expired],
            Paid => &[CreativeDraft, Refunded],
            CreativeDraft => &[CreativeReview, Cancelled, Refunded],
            CreativeReview => &[CreativeDraft, Scheduled, Cancelled, Refunded],
            Scheduled => &[Posted, Cancelled, Refunded],
            Posted => &[Verified, Refunded],
            Verified => &[Released, Refunded],
            Released | Refunded | Cancelled | Expired => &[],
        }
    }

    pub fn can_transition_to(self, to: DealStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DealStatus::Released | DealStatus::Refunded | DealStatus::Cancelled | DealStatus::Expired
        )
    }

    /// Whether escrow holds funds for this deal.
    pub fn is_funded(self) -> bool {
        matches!(
            self,
            DealStatus::Paid
                | DealStatus::CreativeDraft
                | DealStatus::CreativeReview
                | DealStatus::Scheduled
                | DealStatus::Posted
                | DealStatus::Verified
        )
    }
}

pub fn validate_transition(from: DealStatus, to: DealStatus) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition { from, to })
    }
}

/// Cancellation is only possible before anything is posted.
///
/// A `Paid` deal with no creative yet leaves through the refund path.
pub fn can_cancel(status: DealStatus) -> bool {
    matches!(
        status,
        DealStatus::Agreed
            | DealStatus::AwaitingPayment
            | DealStatus::CreativeDraft
            | DealStatus::CreativeReview
            | DealStatus::Scheduled
    )
}
