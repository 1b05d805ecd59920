//! Runtime configuration for embedding HashCredit core.
//!
//! Mirrors the environment-variable-driven configuration style used
//! throughout this codebase: every field has a sensible default, `from_env`
//! never panics, and `validate_for_production` enforces the stricter
//! invariants an operator actually running this on mainnet-adjacent
//! infrastructure would want.

use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::credit_manager::RiskParameters;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("missing required value for {field} in production mode")]
    MissingRequired { field: String },
}

/// Which `CreditStore` backend to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "sqlite" | "sql" => Ok(StorageBackend::Sqlite),
            other => Err(ConfigError::InvalidValue {
                field: "storage_backend".into(),
                value: other.to_string(),
            }),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub storage_backend: StorageBackend,
    pub sqlite_path: String,
    pub log_level: String,
    pub json_logs: bool,
    /// Domain-separating chain identifier bound into
    /// `SignedOracleVerifier`'s typed-data hash.
    pub chain_id: u64,
    pub risk_params: RiskParameters,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            sqlite_path: "hashcredit.db".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            chain_id: 1,
            risk_params: RiskParameters::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or malformed. Never panics.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = env::var("HASHCREDIT_STORAGE_BACKEND") {
            config.storage_backend = v.parse()?;
        }
        if let Ok(v) = env::var("HASHCREDIT_SQLITE_PATH") {
            config.sqlite_path = v;
        }
        if let Ok(v) = env::var("HASHCREDIT_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = env::var("HASHCREDIT_JSON_LOGS") {
            config.json_logs = parse_bool(&v, "json_logs")?;
        }
        if let Ok(v) = env::var("HASHCREDIT_CHAIN_ID") {
            config.chain_id = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "chain_id".into(),
                value: v,
            })?;
        }
        if let Ok(v) = env::var("HASHCREDIT_ADVANCE_RATE_BPS") {
            config.risk_params.advance_rate_bps =
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "advance_rate_bps".into(),
                    value: v,
                })?;
        }
        if let Ok(v) = env::var("HASHCREDIT_BTC_PRICE_USD") {
            config.risk_params.btc_price_usd =
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "btc_price_usd".into(),
                    value: v,
                })?;
        }

        Ok(config)
    }

    /// Stricter checks appropriate before running against real funds.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if matches!(self.storage_backend, StorageBackend::Memory) {
            return Err(ConfigError::MissingRequired {
                field: "storage_backend (memory is not durable)".into(),
            });
        }
        if self.risk_params.btc_price_usd == 0 {
            return Err(ConfigError::MissingRequired {
                field: "risk_params.btc_price_usd".into(),
            });
        }
        Ok(())
    }

    /// A one-line human summary, for startup logs.
    pub fn summary(&self) -> String {
        format!(
            "storage={:?} chain_id={} advance_rate_bps={} btc_price_usd={}",
            self.storage_backend,
            self.chain_id,
            self.risk_params.advance_rate_bps,
            self.risk_params.btc_price_usd
        )
    }
}

fn parse_bool(value: &str, field: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.chain_id, 1);
    }

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!(
            "Sqlite".parse::<StorageBackend>().unwrap(),
            StorageBackend::Sqlite
        );
        assert!("nonsense".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn production_validation_rejects_memory_backend() {
        let config = CoreConfig::default();
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn production_validation_passes_with_sqlite_and_price() {
        let mut config = CoreConfig::default();
        config.storage_backend = StorageBackend::Sqlite;
        config.risk_params.btc_price_usd = 50_000 * crate::units::PRICE_SCALE;
        assert!(config.validate_for_production().is_ok());
    }
}
