//! Shared wire types for the adeal escrow engine.
//!
//! Everything in here is plain data: amounts, statuses and the notification
//! payloads that travel through the outbox. Database-aware counterparts live
//! in `adeal-core::entities`.

#![forbid(unsafe_code)]

pub mod objects;
