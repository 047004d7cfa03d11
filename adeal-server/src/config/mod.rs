//! Configuration module for adeal-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles admin secret hashing.

pub mod file;

use crate::config::file::{FileConfig, WorkerConfig};
use adeal_core::config::{
    AdminConfig, OutboxConfig, ServerConfig, TelegramConfig, TonConfig, WorkerSettings,
    WorkersConfig,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Everything the server needs, validated and in runtime form.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub ton: TonConfig,
    pub telegram: TelegramConfig,
    pub workers: WorkersConfig,
    pub outbox: OutboxConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read, override, validate, hash the admin secret if it is still
    /// plaintext (rewriting the file), then convert.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        let secret_hash = if file_config.is_admin_secret_hashed() {
            file_config.admin.secret.clone()
        } else {
            let hash = hash_secret(&file_config.admin.secret)?;
            file_config.admin.secret = hash.clone();
            self.rewrite_config(&file_config)?;
            tracing::info!("Admin secret hashed and config file updated");
            hash
        };

        Ok(build_loaded_config(file_config, secret_hash))
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |message: &str| Err(ConfigError::ValidationError(message.to_string()));

    if config.admin.secret.trim().is_empty() {
        return invalid("admin secret must not be empty");
    }
    if config.ton.deposit_address.trim().is_empty() {
        return invalid("ton.deposit_address must not be empty");
    }
    if config.ton.transaction_limit == 0 {
        return invalid("ton.transaction_limit must be positive");
    }
    if config.ton.payment_window_secs == 0 {
        return invalid("ton.payment_window_secs must be positive");
    }
    if config.telegram.bot_token.trim().is_empty() {
        return invalid("telegram.bot_token must not be empty");
    }
    let workers = &config.workers;
    for (name, worker) in [
        ("expiry", workers.expiry),
        ("payment", workers.payment),
        ("publication", workers.publication),
        ("settlement", workers.settlement),
        ("outbox", workers.outbox),
    ] {
        if worker.interval_secs == 0 || worker.batch_size <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "workers.{name} needs a positive interval_secs and batch_size"
            )));
        }
    }
    if config.outbox.max_attempts <= 0 {
        return invalid("outbox.max_attempts must be positive");
    }
    if config.outbox.claim_timeout_secs <= 0 {
        return invalid("outbox.claim_timeout_secs must be positive");
    }
    Ok(())
}

fn hash_secret(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn worker_settings(worker: WorkerConfig) -> WorkerSettings {
    WorkerSettings::new(worker.interval_secs, worker.batch_size)
}

fn build_loaded_config(file_config: FileConfig, secret_hash: String) -> LoadedConfig {
    let FileConfig {
        server,
        ton,
        telegram,
        workers,
        outbox,
        ..
    } = file_config;

    LoadedConfig {
        server: ServerConfig {
            listen: server.listen,
        },
        admin: AdminConfig::new(secret_hash),
        ton: TonConfig {
            deposit_address: ton.deposit_address,
            api_url: ton.api_url,
            api_key: ton.api_key,
            transaction_limit: ton.transaction_limit,
            payment_window: time::Duration::seconds(
                i64::try_from(ton.payment_window_secs).unwrap_or(i64::MAX),
            ),
        },
        telegram: TelegramConfig {
            bot_token: telegram.bot_token,
            api_url: telegram.api_url,
        },
        workers: WorkersConfig {
            expiry: worker_settings(workers.expiry),
            payment: worker_settings(workers.payment),
            publication: worker_settings(workers.publication),
            settlement: worker_settings(workers.settlement),
            outbox: worker_settings(workers.outbox),
        },
        outbox: OutboxConfig {
            max_attempts: outbox.max_attempts,
            claim_timeout: time::Duration::seconds(outbox.claim_timeout_secs),
        },
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
