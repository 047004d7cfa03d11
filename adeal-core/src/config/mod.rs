//! Configuration types for the adeal engine.
//!
//! These are the validated runtime values. Loading and parsing the TOML file
//! is the server crate's job.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Admin authentication.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Argon2 PHC string of the admin secret.
    pub secret_hash: String,
}

impl AdminConfig {
    pub fn new(secret_hash: String) -> Self {
        Self { secret_hash }
    }

    /// Check a plaintext secret against the stored hash.
    pub fn verify_secret(&self, plaintext: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(&self.secret_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct TonConfig {
    /// The single address every advertiser pays into.
    pub deposit_address: String,
    pub api_url: Url,
    pub api_key: Option<String>,
    /// How many recent transactions one poll fetches.
    pub transaction_limit: u32,
    /// How long a payment request stays payable.
    pub payment_window: time::Duration,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_url: Url,
}

/// Tick interval and batch bound of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub batch_size: i64,
}

impl WorkerSettings {
    pub const fn new(interval_secs: u64, batch_size: i64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            batch_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkersConfig {
    pub expiry: WorkerSettings,
    pub payment: WorkerSettings,
    pub publication: WorkerSettings,
    pub settlement: WorkerSettings,
    pub outbox: WorkerSettings,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            expiry: WorkerSettings::new(30, 50),
            payment: WorkerSettings::new(15, 20),
            publication: WorkerSettings::new(30, 20),
            settlement: WorkerSettings::new(60, 20),
            outbox: WorkerSettings::new(10, 10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Failed deliveries allowed before a message is dead-lettered.
    pub max_attempts: i32,
    /// A `processing` claim older than this is considered abandoned.
    pub claim_timeout: time::Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            claim_timeout: time::Duration::minutes(5),
        }
    }
}
