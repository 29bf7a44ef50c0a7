use crate::account::AccountIdentity;
use crate::chain::RpcTimeouts;
use crate::core_types::Address;
use crate::forge::SigningKey;
use crate::network::Networks;
use crate::probe::{ReconcileSettings, RetryPolicy};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PLANET_REGISTRY: &str = "https://planets.nine-chronicles.com/planets/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Environment variable {var} for account {account} is not set")]
    MissingSecret { account: String, var: String },

    #[error("Invalid private key for account {account}: {reason}")]
    InvalidKey { account: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// PostgreSQL URL for probe records; absent means in-memory records
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub postgres_max_connections: u32,
    #[serde(default)]
    pub directory: DirectoryConfig,
    pub networks: Networks,
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "node_pulse.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Where endpoint lists come from
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectoryConfig {
    /// Public planet registry
    Registry {
        #[serde(default = "default_registry_url")]
        url: String,
        #[serde(default = "default_registry_timeout")]
        timeout_secs: u64,
    },
    /// `endpoints` lists of each network profile
    Static,
}

fn default_registry_url() -> String {
    DEFAULT_PLANET_REGISTRY.to_string()
}

fn default_registry_timeout() -> u64 {
    10
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig::Registry {
            url: default_registry_url(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

/// Probe account; the private key is read from the named environment variable
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub address: Address,
    pub private_key_env: String,
}

impl AccountConfig {
    pub fn load_key(&self) -> Result<SigningKey, ConfigError> {
        let secret = std::env::var(&self.private_key_env).map_err(|_| ConfigError::MissingSecret {
            account: self.name.clone(),
            var: self.private_key_env.clone(),
        })?;
        SigningKey::from_hex(&secret).map_err(|e| ConfigError::InvalidKey {
            account: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub send_timeout_secs: u64,
    pub balance_timeout_secs: u64,
    /// Refresh balances every N sweeps (0 disables in-sweep refresh)
    pub balance_refresh_every_cycles: u64,
    /// Consecutive failed sends before an account is marked inactive
    pub failure_streak_limit: u32,
    /// Transfer quantity in smallest units (1 = 0.01)
    pub transfer_units: i64,
    pub pool_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_attempts: 3,
            retry_delay_ms: 2000,
            send_timeout_secs: 20,
            balance_timeout_secs: 10,
            balance_refresh_every_cycles: 10,
            failure_streak_limit: 3,
            transfer_units: 1,
            pool_buffer: 64,
        }
    }
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    pub window: usize,
    pub max_batch: usize,
    pub on_time_secs: i64,
    pub staging_timeout_secs: i64,
    /// TEMP records older than this are closed as SEND_FAILED
    pub stale_temp_secs: i64,
    pub check_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            window: 100,
            max_batch: 50,
            on_time_secs: 70,
            staging_timeout_secs: 180,
            stale_temp_secs: 300,
            check_timeout_secs: 20,
        }
    }
}

impl ReconcileConfig {
    pub fn settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            window: self.window,
            max_batch: self.max_batch,
            on_time: TimeDelta::seconds(self.on_time_secs),
            staging_timeout: TimeDelta::seconds(self.staging_timeout_secs),
            stale_temp_after: TimeDelta::seconds(self.stale_temp_secs),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least 2 accounts are required to form a pair, got {}",
                self.accounts.len()
            )));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.max_attempts must be >= 1".into()));
        }
        if self.dispatch.transfer_units <= 0 {
            return Err(ConfigError::Invalid("dispatch.transfer_units must be positive".into()));
        }
        if self.reconcile.max_batch == 0 || self.reconcile.window == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.window and reconcile.max_batch must be >= 1".into(),
            ));
        }
        if self.reconcile.on_time_secs > self.reconcile.staging_timeout_secs {
            return Err(ConfigError::Invalid(
                "reconcile.on_time_secs must not exceed staging_timeout_secs".into(),
            ));
        }
        if self.reconcile.stale_temp_secs <= 0 {
            return Err(ConfigError::Invalid("reconcile.stale_temp_secs must be positive".into()));
        }
        if self.directory == DirectoryConfig::Static
            && self.networks.iter().all(|(_, p)| p.endpoints.is_empty())
        {
            return Err(ConfigError::Invalid(
                "static directory needs endpoints in at least one network".into(),
            ));
        }
        Ok(())
    }

    pub fn rpc_timeouts(&self) -> RpcTimeouts {
        RpcTimeouts {
            send: Duration::from_secs(self.dispatch.send_timeout_secs),
            check: Duration::from_secs(self.reconcile.check_timeout_secs),
            balance: Duration::from_secs(self.dispatch.balance_timeout_secs),
        }
    }

    /// Resolve every account's key; ids follow configuration order
    pub fn identities(&self) -> Result<Vec<Arc<AccountIdentity>>, ConfigError> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(id, account)| {
                Ok(Arc::new(AccountIdentity {
                    id,
                    name: account.name.clone(),
                    address: account.address,
                    key: account.load_key()?,
                }))
            })
            .collect()
    }
}
