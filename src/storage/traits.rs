//! Storage trait definitions.
//!
//! `CreditManager` is generic over a [`CreditStore`] so the borrower
//! registry, processed-payout replay set, and payout history can be backed
//! by an in-memory map for tests or a durable SQLite database for
//! production, without changing any credit logic.

use async_trait::async_trait;
use thiserror::Error;

use crate::credit_manager::BorrowerRecord;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence boundary for everything `CreditManager` owns: the
/// borrower registry, the `(txid, vout)` replay set, and each borrower's
/// bounded payout history.
///
/// `apply_payout` exists as a single method (rather than two separate
/// "mark processed" and "update borrower" calls) so a backing store can
/// commit both writes in one transaction, matching §5's "commits all its
/// state writes, or none" atomicity requirement at the storage layer
/// too.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Register a new borrower. Fails with [`StorageError::Duplicate`]
    /// if the borrower already has a record.
    async fn register_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()>;

    /// Fetch a borrower's current record, if registered.
    async fn get_borrower(&self, borrower: &[u8; 20]) -> StorageResult<Option<BorrowerRecord>>;

    /// Overwrite a borrower's record (admin freeze/unfreeze, borrow,
    /// repay). Fails with [`StorageError::NotFound`] if the borrower is
    /// not registered.
    async fn update_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()>;

    /// Whether `(txid, vout)` has already been applied to credit state.
    async fn is_processed(&self, txid: [u8; 32], vout: u32) -> StorageResult<bool>;

    /// Atomically mark `(txid, vout)` processed and commit the updated
    /// borrower record. Used for every successful `submitPayout`,
    /// including below-minimum payouts that lock replay without any
    /// other credit effect.
    async fn apply_payout(
        &self,
        borrower: [u8; 20],
        txid: [u8; 32],
        vout: u32,
        record: BorrowerRecord,
    ) -> StorageResult<()>;
}
