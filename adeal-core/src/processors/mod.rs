//! Background reconcilers.
//!
//! Each reconciler re-reads its work from the store on every tick, so a
//! crashed or restarted worker simply picks up where the database says it is:
//!
//! - `ExpiryReconciler`: `Agreed` / `AwaitingPayment` past `expires_at` -> `Expired`
//! - `PaymentReconciler`: matches deposits to pending invoices, `AwaitingPayment` -> `Paid`
//! - `PublicationScheduler`: due `Scheduled` deals -> `Posted`
//! - `SettlementVerifier`: `Posted` past the campaign window -> `Verified` -> `Released`
//! - `OutboxDispatcher`: delivers queued notifications with backoff

pub mod expiry_reconciler;
pub mod outbox_dispatcher;
pub mod payment_reconciler;
pub mod publication_scheduler;
pub mod runner;
pub mod settlement_verifier;

pub use expiry_reconciler::ExpiryReconciler;
pub use outbox_dispatcher::{OutboxDispatcher, retry_delay};
pub use payment_reconciler::PaymentReconciler;
pub use publication_scheduler::{PublicationScheduler, publish};
pub use runner::{Reconciler, TickReport, WorkerError, WorkerRunner};
pub use settlement_verifier::SettlementVerifier;
