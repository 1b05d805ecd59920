//! HashCredit core — an on-chain credit engine that issues revolving
//! stablecoin lines of credit to Bitcoin miners, collateralized by
//! verified Bitcoin payout events rather than posted tokens.
//!
//! Three tightly coupled subsystems make up the core:
//!
//! 1. [`bitcoin_primitives`] + [`checkpoint`] + [`verifier::spv`]: an SPV
//!    verifier that proves a specific transaction output paid a specific
//!    20-byte key hash at a specific block height, anchored to a trusted
//!    checkpoint with enough proof-of-work depth.
//! 2. [`verifier`]: a pluggable verifier-adapter boundary — SPV today,
//!    [`verifier::oracle`] as an MVP/fallback, future evidence sources
//!    behind the same `VerifierAdapter` trait.
//! 3. [`credit_manager`] + [`vault`]: a credit manager that consumes
//!    verified payout evidence, maintains a time-windowed
//!    trailing-revenue ledger with interest-bearing debt, and routes
//!    borrow/repay traffic into a share-based [`vault::LiquidityVault`].

pub mod bitcoin_primitives;
pub mod checkpoint;
pub mod config;
pub mod credit_manager;
pub mod error;
pub mod events;
pub mod logging;
pub mod storage;
pub mod units;
pub mod vault;
pub mod verifier;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use config::{CoreConfig, StorageBackend};
pub use credit_manager::{
    BorrowerRecord, BorrowerStatus, CreditManager, CreditManagerError, PayoutRecord,
    RiskParameters,
};
pub use error::{CoreError, Result};
pub use events::{CoreEvent, EventSink, NullEventSink, RecordingEventSink, TracingEventSink};
pub use storage::{CreditStore, MemoryCreditStore, SqliteCreditStore, StorageError};
pub use vault::{AssetToken, LiquidityVault, NullAssetToken, VaultError};
pub use verifier::{
    OracleError, PayoutEvidence, SignedOracleVerifier, SpvError, SpvVerifier, VerifierAdapter,
    VerifierError,
};

#[cfg(test)]
mod integration_tests;
