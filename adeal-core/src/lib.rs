#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod actions;
pub mod clients;
pub mod clock;
pub mod config;
pub mod entities;
pub mod framework;
pub mod matching;
pub mod processors;
pub mod state_machine;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
