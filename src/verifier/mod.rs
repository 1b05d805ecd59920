//! The verifier-adapter boundary.
//!
//! `CreditManager` consumes payout evidence through a single trait object
//! rather than a hand-rolled tagged union of adapter kinds — idiomatic
//! Rust dynamic dispatch gives the same "opaque handle holding a fixed
//! capability set" shape the adapter boundary calls for, without a
//! manual enum dispatch table that has to be extended by hand for every
//! future adapter.

pub mod oracle;
pub mod spv;

use async_trait::async_trait;
use thiserror::Error;

pub use oracle::{OracleError, SignedOracleVerifier};
pub use spv::{SpvError, SpvVerifier};

/// The output every verifier adapter produces on success: proof that a
/// specific payout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutEvidence {
    /// Opaque 20-byte account identifier.
    pub borrower: [u8; 20],
    /// Internal byte order, equal to `sha256d(rawTx)`.
    pub txid: [u8; 32],
    pub vout: u32,
    pub amount_sats: u64,
    pub block_height: u32,
    pub block_timestamp: u32,
}

/// Unified failure type across verifier adapters, so `CreditManager` can
/// hold `Arc<dyn VerifierAdapter>` without knowing the concrete adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error(transparent)]
    Spv(#[from] SpvError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// The capability every payout-evidence source exposes to the manager.
#[async_trait]
pub trait VerifierAdapter: Send + Sync {
    async fn verify_payout(&self, proof_bytes: &[u8]) -> Result<PayoutEvidence, VerifierError>;
}
