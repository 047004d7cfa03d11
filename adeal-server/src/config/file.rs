//! TOML file configuration structures.
//!
//! These structs directly map to the `adeal-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub ton: TonConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonConfig {
    pub deposit_address: String,
    #[serde(default = "default_ton_api_url")]
    pub api_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_transaction_limit")]
    pub transaction_limit: u32,
    #[serde(default = "default_payment_window_secs")]
    pub payment_window_secs: u64,
}

fn default_ton_api_url() -> Url {
    Url::parse("https://tonapi.io").expect("valid default TonAPI url")
}

fn telegram_api_url() -> Url {
    Url::parse("https://api.telegram.org").expect("valid default Telegram url")
}

fn default_transaction_limit() -> u32 {
    100
}

fn default_payment_window_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "telegram_api_url")]
    pub api_url: Url,
}

/// `interval_secs` + `batch_size` for one worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub interval_secs: u64,
    pub batch_size: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_expiry")]
    pub expiry: WorkerConfig,
    #[serde(default = "default_payment")]
    pub payment: WorkerConfig,
    #[serde(default = "default_publication")]
    pub publication: WorkerConfig,
    #[serde(default = "default_settlement")]
    pub settlement: WorkerConfig,
    #[serde(default = "default_outbox")]
    pub outbox: WorkerConfig,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            expiry: default_expiry(),
            payment: default_payment(),
            publication: default_publication(),
            settlement: default_settlement(),
            outbox: default_outbox(),
        }
    }
}

fn worker(settings: adeal_core::config::WorkerSettings) -> WorkerConfig {
    WorkerConfig {
        interval_secs: settings.interval.as_secs(),
        batch_size: settings.batch_size,
    }
}

fn default_expiry() -> WorkerConfig {
    worker(adeal_core::config::WorkersConfig::default().expiry)
}

fn default_payment() -> WorkerConfig {
    worker(adeal_core::config::WorkersConfig::default().payment)
}

fn default_publication() -> WorkerConfig {
    worker(adeal_core::config::WorkersConfig::default().publication)
}

fn default_settlement() -> WorkerConfig {
    worker(adeal_core::config::WorkersConfig::default().settlement)
}

fn default_outbox() -> WorkerConfig {
    worker(adeal_core::config::WorkersConfig::default().outbox)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> i32 {
    adeal_core::config::OutboxConfig::default().max_attempts
}

fn default_claim_timeout_secs() -> i64 {
    adeal_core::config::OutboxConfig::default()
        .claim_timeout
        .whole_seconds()
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}
