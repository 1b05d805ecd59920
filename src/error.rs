//! Root error aggregation.
//!
//! Each component defines its own error enum close to where its failures
//! originate (`SpvError`, `OracleError`, `CheckpointError`,
//! `VaultError`, `CreditManagerError`, `StorageError`). `CoreError`
//! exists for callers who want to handle every failure mode of the crate
//! through a single type.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::credit_manager::CreditManagerError;
use crate::storage::StorageError;
use crate::vault::VaultError;
use crate::verifier::oracle::OracleError;
use crate::verifier::spv::SpvError;

/// Root error type for the HashCredit core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("spv verification error: {0}")]
    Spv(#[from] SpvError),

    #[error("oracle verification error: {0}")]
    Oracle(#[from] OracleError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("credit manager error: {0}")]
    CreditManager(#[from] CreditManagerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// A stable string identifier for the error, suitable for logging
    /// fields or API error codes, without exposing the full `Display`
    /// message.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Checkpoint(_) => "CHECKPOINT_ERROR",
            CoreError::Spv(_) => "SPV_ERROR",
            CoreError::Oracle(_) => "ORACLE_ERROR",
            CoreError::Vault(_) => "VAULT_ERROR",
            CoreError::CreditManager(_) => "CREDIT_MANAGER_ERROR",
            CoreError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
