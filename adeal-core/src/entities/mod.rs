pub mod deal;
pub mod deal_event;
pub mod escrow;
pub mod outbox_message;
pub mod payment;
pub mod user;

pub use deal::{Creative, CreativeMedia, Deal, DealContext, DealParties, DealStamps, DealStatus, DealTransition, MediaKind, NewDeal};
pub use deal_event::{DealEvent, DealEventKind, NewDealEvent};
pub use escrow::{EscrowBalance, EscrowTransaction, EscrowTransactionKind, NewEscrowTransaction};
pub use outbox_message::{NewOutboxMessage, OutboxMessage, OutboxStatus};
pub use payment::{NewPayment, Payment, PaymentConfirmation, PaymentStatus};

/// Currency code used for every TON-denominated row.
pub const TON: &str = "TON";
