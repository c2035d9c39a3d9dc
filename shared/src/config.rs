//! Configuration management for the redemption service

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub redeem: RedeemConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Which backend holds code rows, balances and usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!("unknown REDEEM_STORE backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemConfig {
    pub store: StoreBackend,
    /// Bounds of the randomized sleep taken before each redemption. 0..0 disables it.
    pub random_delay_ms_min: u64,
    pub random_delay_ms_max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub log_level: String,
    pub port: u16,
}

const DEV_JWT_SECRET: &str = "quota-redeem-development-secret";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let environment = var("APP_ENV", "development");

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ if environment == "development" || environment == "test" => DEV_JWT_SECRET.to_string(),
            _ => anyhow::bail!("JWT_SECRET must be set when APP_ENV={}", environment),
        };

        let random_delay_ms_min: u64 = var("REDEEM_RANDOM_DELAY_MS_MIN", "0").parse()?;
        let random_delay_ms_max: u64 = var("REDEEM_RANDOM_DELAY_MS_MAX", "0").parse()?;
        if random_delay_ms_max < random_delay_ms_min {
            anyhow::bail!(
                "REDEEM_RANDOM_DELAY_MS_MAX ({}) is lower than REDEEM_RANDOM_DELAY_MS_MIN ({})",
                random_delay_ms_max,
                random_delay_ms_min
            );
        }

        Ok(Config {
            database: DatabaseConfig {
                url: var("DATABASE_URL", "postgresql://localhost:5432/quota_redeem"),
                max_connections: var("DATABASE_MAX_CONNECTIONS", "20").parse()?,
                min_connections: var("DATABASE_MIN_CONNECTIONS", "2").parse()?,
                acquire_timeout_seconds: var("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "5").parse()?,
                idle_timeout_seconds: var("DATABASE_IDLE_TIMEOUT_SECONDS", "300").parse()?,
                max_lifetime_seconds: var("DATABASE_MAX_LIFETIME_SECONDS", "1800").parse()?,
            },
            auth: AuthConfig { jwt_secret },
            redeem: RedeemConfig {
                store: var("REDEEM_STORE", "postgres").parse()?,
                random_delay_ms_min,
                random_delay_ms_max,
            },
            app: AppConfig {
                environment,
                log_level: var("RUST_LOG", "info"),
                port: var("PORT", "8000").parse()?,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.app.environment == "development"
    }
}
