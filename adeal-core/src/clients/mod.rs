//! External collaborators: the TON explorer and the Telegram bot.
//!
//! Workers only see the traits; the HTTP clients live next to them.

pub mod telegram;
pub mod ton;

pub use telegram::{ChannelMessenger, MessengerError, NotifyError, Notifier, TelegramBot};
pub use ton::{ObserverError, TonApiClient, TransactionSource};
