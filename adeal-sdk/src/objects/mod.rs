pub mod admin;
pub mod deal;
pub mod notification;
pub mod ton;

pub use deal::{DealEventKind, DealStatus};
pub use notification::{Notification, OutboxEnvelope};
pub use ton::{AmountError, NANOTONS_PER_TON, TonAmount, payment_uri};
