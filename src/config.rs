use std::str::FromStr;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub db_max_connections: u32,

    /// Signs session bearer tokens
    pub jwt_secret: String,
    /// Signs transaction-scoped callback tokens handed to the gateway
    pub jwt_callback_secret: String,
    pub callback_token_ttl_secs: i64,

    pub gateway_base_url: Option<String>,
    pub gateway_callback_url: Option<String>,

    pub wallet_rpc_endpoint: Option<String>,
    pub wallet_rpc_username: Option<String>,
    pub wallet_rpc_password: Option<String>,
    /// Wallet file opened at startup when the RPC has none open
    pub wallet_name: Option<String>,
    pub wallet_password: Option<String>,

    pub reconcile_interval_secs: u64,
    pub reconcile_grace_secs: i64,
    pub reconcile_deadline_secs: u64,

    pub settlement_interval_secs: u64,
    pub settlement_deadline_secs: u64,
    pub settlement_max_batch: usize,
    pub min_payout_amount: i64,

    pub shutdown_grace_secs: u64,

    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
    pub callback_rate_per_sec: u32,
    pub callback_rate_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = required("JWT_SECRET")?;
        let jwt_callback_secret = required("JWT_CALLBACK_SECRET")?;
        if jwt_secret == jwt_callback_secret {
            return Err(ConfigError::Message(
                "JWT_CALLBACK_SECRET must differ from JWT_SECRET".to_string(),
            ));
        }

        let config = Self {
            database_url: required("DATABASE_URL")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 20)?,
            jwt_secret,
            jwt_callback_secret,
            callback_token_ttl_secs: parsed("CALLBACK_TOKEN_TTL_SECS", 6 * 60 * 60)?,
            gateway_base_url: optional("GATEWAY_BASE_URL"),
            gateway_callback_url: optional("GATEWAY_CALLBACK_URL"),
            wallet_rpc_endpoint: optional("WALLET_RPC_ENDPOINT"),
            wallet_rpc_username: optional("WALLET_RPC_USERNAME"),
            wallet_rpc_password: optional("WALLET_RPC_PASSWORD"),
            wallet_name: optional("WALLET_NAME"),
            wallet_password: optional("WALLET_PASSWORD"),
            reconcile_interval_secs: parsed("RECONCILE_INTERVAL_SECS", 2)?,
            reconcile_grace_secs: parsed("RECONCILE_GRACE_SECS", 60)?,
            reconcile_deadline_secs: parsed("RECONCILE_DEADLINE_SECS", 20)?,
            settlement_interval_secs: parsed("SETTLEMENT_INTERVAL_SECS", 30)?,
            settlement_deadline_secs: parsed("SETTLEMENT_DEADLINE_SECS", 120)?,
            settlement_max_batch: parsed("SETTLEMENT_MAX_BATCH", 15)?,
            min_payout_amount: parsed("MIN_PAYOUT_AMOUNT", 3_000_000)?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 10)?,
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            callback_rate_per_sec: parsed("CALLBACK_RATE_PER_SEC", 20)?,
            callback_rate_burst: parsed("CALLBACK_RATE_BURST", 50)?,
        };

        if config.gateway_base_url.is_some() && config.gateway_callback_url.is_none() {
            return Err(ConfigError::Message(
                "GATEWAY_CALLBACK_URL is required when GATEWAY_BASE_URL is set".to_string(),
            ));
        }
        if config.settlement_max_batch == 0 {
            return Err(ConfigError::Message(
                "SETTLEMENT_MAX_BATCH must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::NotFound(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Message(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}
