//! Borrower registry, payout ledger, and borrow/repay routing.
//!
//! The credit manager is the single authority that marks payouts as
//! processed (the verifier adapters are stateless), owns every
//! `BorrowerRecord`, and is the only caller of the vault's
//! manager-only `borrow_funds`/`repay_funds` path.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::{CoreEvent, EventSink};
use crate::storage::{CreditStore, StorageError};
use crate::units::{accrue_interest, sats_price_bps_to_stable};
use crate::vault::LiquidityVault;
use crate::verifier::{PayoutEvidence, VerifierAdapter, VerifierError};

/// Bound on a borrower's payout ring buffer. Not named by an external
/// contract; chosen generously enough that `windowSeconds` pruning
/// empties it long before capacity pressure matters for realistic
/// payout cadences.
pub const MAX_PAYOUT_RECORDS: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CreditManagerError {
    #[error("borrower already registered")]
    BorrowerAlreadyRegistered,
    #[error("borrower not registered")]
    BorrowerNotRegistered,
    #[error("borrower is not active")]
    BorrowerNotActive,
    #[error("amount exceeds available credit limit")]
    ExceedsCreditLimit,
    #[error("payout already processed")]
    PayoutAlreadyProcessed,
    #[error("zero amount")]
    ZeroAmount,
    #[error("manager is paused")]
    Paused,
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    #[error(transparent)]
    Vault(#[from] crate::vault::VaultError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for CreditManagerError {
    fn from(e: StorageError) -> Self {
        CreditManagerError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowerStatus {
    Active,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub txid_key: [u8; 32],
    pub vout: u32,
    pub effective_amount_sats: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerRecord {
    pub status: BorrowerStatus,
    pub btc_payout_key_hash: [u8; 32],
    pub total_revenue_sats: u64,
    pub trailing_revenue_sats: u64,
    pub credit_limit: u128,
    pub current_debt: u128,
    pub interest_owed: u128,
    pub last_debt_update_timestamp: u64,
    pub created_at: u64,
    pub payout_count: u64,
    pub payout_history: VecDeque<PayoutRecord>,
}

impl BorrowerRecord {
    fn new(btc_payout_key_hash: [u8; 32], created_at: u64) -> Self {
        Self {
            status: BorrowerStatus::Active,
            btc_payout_key_hash,
            total_revenue_sats: 0,
            trailing_revenue_sats: 0,
            credit_limit: 0,
            current_debt: 0,
            interest_owed: 0,
            last_debt_update_timestamp: created_at,
            created_at,
            payout_count: 0,
            payout_history: VecDeque::new(),
        }
    }

    /// Interest owed as of `now`: whatever was already outstanding from a
    /// prior partial payment, plus what has accrued on `current_debt`
    /// since the clock was last reset.
    fn accrued_interest(&self, apr_bps: u64, now: u64) -> u128 {
        let elapsed = now.saturating_sub(self.last_debt_update_timestamp);
        self.interest_owed + accrue_interest(self.current_debt, apr_bps, elapsed)
    }
}

/// Admin-tunable risk configuration. Changes take effect immediately on
/// the next call that reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskParameters {
    /// Informational at the manager level; the verifier enforces its own
    /// confirmation depth independently.
    pub confirmations_required: u32,
    pub advance_rate_bps: u64,
    pub window_seconds: u64,
    pub new_borrower_period_seconds: u64,
    pub new_borrower_cap: u128,
    /// 0 means unlimited.
    pub global_cap: u128,
    pub min_payout_sats: u64,
    /// Scaled by `units::PRICE_SCALE`.
    pub btc_price_usd: u64,
    pub min_payout_count_for_full_credit: u64,
    /// 0 disables the large-payout discount.
    pub large_payout_threshold_sats: u64,
    pub large_payout_discount_bps: u64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            confirmations_required: 6,
            advance_rate_bps: 5_000,
            window_seconds: 30 * 86_400,
            new_borrower_period_seconds: 30 * 86_400,
            new_borrower_cap: 10_000 * crate::units::STABLE_UNIT as u128,
            global_cap: 0,
            min_payout_sats: 0,
            btc_price_usd: 50_000 * crate::units::PRICE_SCALE,
            min_payout_count_for_full_credit: 0,
            large_payout_threshold_sats: 0,
            large_payout_discount_bps: 10_000,
        }
    }
}

struct ManagerState {
    paused: bool,
    verifier: Arc<dyn VerifierAdapter>,
    vault: Arc<LiquidityVault>,
    risk_params: RiskParameters,
    pool_registry: Option<String>,
}

/// Owner of credit state; the single authority that marks payouts
/// processed. One `tokio::sync::Mutex` covers the full critical section
/// of every public operation, which is both this component's
/// reentrancy guard and its atomic-commit boundary — the only legal
/// nested lock acquisition is into the vault's own, distinct mutex.
pub struct CreditManager {
    state: Mutex<ManagerState>,
    store: Arc<dyn CreditStore>,
    sink: Arc<dyn EventSink>,
}

fn hex20(bytes: [u8; 20]) -> String {
    hex::encode(bytes)
}

impl CreditManager {
    pub fn new(
        verifier: Arc<dyn VerifierAdapter>,
        vault: Arc<LiquidityVault>,
        risk_params: RiskParameters,
        store: Arc<dyn CreditStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                paused: false,
                verifier,
                vault,
                risk_params,
                pool_registry: None,
            }),
            store,
            sink,
        }
    }

    pub async fn register_borrower(
        &self,
        borrower: [u8; 20],
        btc_payout_key_hash: [u8; 32],
        now: u64,
    ) -> Result<(), CreditManagerError> {
        let _state = self.state.lock().await;
        if self.store.get_borrower(&borrower).await?.is_some() {
            return Err(CreditManagerError::BorrowerAlreadyRegistered);
        }
        let record = BorrowerRecord::new(btc_payout_key_hash, now);
        self.store.register_borrower(borrower, record).await?;
        self.sink.emit(CoreEvent::BorrowerRegistered {
            borrower: hex20(borrower),
        });
        Ok(())
    }

    /// Verify and apply a payout. Implements the 8-step payout
    /// application algorithm; blocked when paused.
    pub async fn submit_payout(&self, proof_bytes: &[u8], now: u64) -> Result<(), CreditManagerError> {
        let state = self.state.lock().await;
        if state.paused {
            return Err(CreditManagerError::Paused);
        }

        let evidence = state.verifier.verify_payout(proof_bytes).await?;
        let risk = state.risk_params;
        drop(state);

        self.apply_payout(evidence, risk, now).await
    }

    async fn apply_payout(
        &self,
        evidence: PayoutEvidence,
        risk: RiskParameters,
        now: u64,
    ) -> Result<(), CreditManagerError> {
        // Step 1: borrower must be registered; amount must be non-zero.
        let mut record = self
            .store
            .get_borrower(&evidence.borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        if evidence.amount_sats == 0 {
            return Err(CreditManagerError::ZeroAmount);
        }

        // Step 2: reject replays.
        if self.store.is_processed(evidence.txid, evidence.vout).await? {
            return Err(CreditManagerError::PayoutAlreadyProcessed);
        }

        // Step 4: below-minimum payouts still lock replay but have no
        // credit effect (step 3's "mark processed before further work"
        // is realized by committing this branch's unchanged record
        // alongside the processed flag in one storage call).
        if evidence.amount_sats < risk.min_payout_sats {
            self.store
                .apply_payout(evidence.borrower, evidence.txid, evidence.vout, record)
                .await?;
            self.sink.emit(CoreEvent::PayoutBelowMinimum {
                borrower: hex20(evidence.borrower),
                txid: hex::encode(evidence.txid),
                vout: evidence.vout,
                amount_sats: evidence.amount_sats,
            });
            return Ok(());
        }

        // Step 5: large-payout discount heuristic.
        let effective_amount_sats = if risk.large_payout_threshold_sats > 0
            && evidence.amount_sats >= risk.large_payout_threshold_sats
        {
            evidence.amount_sats * risk.large_payout_discount_bps / 10_000
        } else {
            evidence.amount_sats
        };

        // Step 6: update lifetime counters and the ring buffer.
        record.total_revenue_sats += evidence.amount_sats;
        record.payout_count += 1;
        record.payout_history.push_back(PayoutRecord {
            txid_key: evidence.txid,
            vout: evidence.vout,
            effective_amount_sats,
            timestamp: evidence.block_timestamp as u64,
        });
        let mut evicted = 0usize;
        while record.payout_history.len() > MAX_PAYOUT_RECORDS {
            record.payout_history.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            self.sink.emit(CoreEvent::PayoutRecordsEvicted {
                borrower: hex20(evidence.borrower),
                evicted_count: evicted,
            });
        }

        // Step 7: prune the trailing window and recompute trailing revenue.
        let before_len = record.payout_history.len();
        while let Some(front) = record.payout_history.front() {
            if front.timestamp + risk.window_seconds < now {
                record.payout_history.pop_front();
            } else {
                break;
            }
        }
        let pruned = before_len - record.payout_history.len();
        record.trailing_revenue_sats = record
            .payout_history
            .iter()
            .map(|p| p.effective_amount_sats)
            .sum();
        if pruned > 0 {
            self.sink.emit(CoreEvent::PayoutWindowPruned {
                borrower: hex20(evidence.borrower),
                pruned_count: pruned,
                trailing_revenue_sats: record.trailing_revenue_sats,
            });
        }

        // Step 8: recompute the credit limit.
        let raw = sats_price_bps_to_stable(
            record.trailing_revenue_sats,
            risk.btc_price_usd,
            risk.advance_rate_bps,
        );
        let in_new_borrower_period = now.saturating_sub(record.created_at) < risk.new_borrower_period_seconds
            || record.payout_count < risk.min_payout_count_for_full_credit;
        let mut new_limit = if in_new_borrower_period {
            raw.min(risk.new_borrower_cap)
        } else {
            raw
        };
        if risk.global_cap > 0 {
            new_limit = new_limit.min(risk.global_cap);
        }
        let old_limit = record.credit_limit;
        record.credit_limit = new_limit;

        self.store
            .apply_payout(evidence.borrower, evidence.txid, evidence.vout, record)
            .await?;

        self.sink.emit(CoreEvent::PayoutSubmitted {
            borrower: hex20(evidence.borrower),
            txid: hex::encode(evidence.txid),
            vout: evidence.vout,
            amount_sats: evidence.amount_sats,
            effective_amount_sats,
        });
        if new_limit != old_limit {
            self.sink.emit(CoreEvent::CreditLimitUpdated {
                borrower: hex20(evidence.borrower),
                old_limit,
                new_limit,
            });
        }

        Ok(())
    }

    /// `currentDebt + accruedInterest` at `now`, without mutating state.
    pub async fn get_current_debt(&self, borrower: [u8; 20], now: u64) -> Result<u128, CreditManagerError> {
        let record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        let apr = self.state.lock().await.vault.fixed_apr_bps().await;
        Ok(record.current_debt + record.accrued_interest(apr, now))
    }

    pub async fn get_accrued_interest(&self, borrower: [u8; 20], now: u64) -> Result<u128, CreditManagerError> {
        let record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        let apr = self.state.lock().await.vault.fixed_apr_bps().await;
        Ok(record.accrued_interest(apr, now))
    }

    pub async fn get_available_credit(&self, borrower: [u8; 20], now: u64) -> Result<u128, CreditManagerError> {
        let record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        let debt = self.get_current_debt(borrower, now).await?;
        Ok(record.credit_limit.saturating_sub(debt))
    }

    pub async fn get_borrower_info(&self, borrower: [u8; 20]) -> Result<BorrowerRecord, CreditManagerError> {
        self.store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)
    }

    pub async fn is_payout_processed(&self, txid: [u8; 32], vout: u32) -> Result<bool, CreditManagerError> {
        Ok(self.store.is_processed(txid, vout).await?)
    }

    pub async fn get_payout_history_count(&self, borrower: [u8; 20]) -> Result<usize, CreditManagerError> {
        Ok(self.get_borrower_info(borrower).await?.payout_history.len())
    }

    pub async fn get_payout_record(
        &self,
        borrower: [u8; 20],
        index: usize,
    ) -> Result<Option<PayoutRecord>, CreditManagerError> {
        Ok(self.get_borrower_info(borrower).await?.payout_history.get(index).copied())
    }

    /// Capitalizes accrued interest into principal, then checks the new
    /// principal against the credit limit before drawing `amount` from
    /// the vault.
    pub async fn borrow(&self, borrower: [u8; 20], amount: u128, now: u64) -> Result<(), CreditManagerError> {
        if amount == 0 {
            return Err(CreditManagerError::ZeroAmount);
        }
        let state = self.state.lock().await;
        if state.paused {
            return Err(CreditManagerError::Paused);
        }

        let mut record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        if record.status != BorrowerStatus::Active {
            return Err(CreditManagerError::BorrowerNotActive);
        }

        let apr = state.vault.fixed_apr_bps().await;
        let interest = record.accrued_interest(apr, now);
        record.current_debt += interest;
        record.interest_owed = 0;
        record.last_debt_update_timestamp = now;

        if record.current_debt + amount > record.credit_limit {
            return Err(CreditManagerError::ExceedsCreditLimit);
        }
        record.current_debt += amount;

        state.vault.borrow_funds(&hex20(borrower), amount, now).await?;
        self.store.update_borrower(borrower, record).await?;
        drop(state);

        self.sink.emit(CoreEvent::Borrowed {
            borrower: hex20(borrower),
            amount,
        });
        Ok(())
    }

    /// Pays accrued interest first, then principal; overpayment is
    /// clamped to outstanding debt.
    pub async fn repay(&self, borrower: [u8; 20], amount: u128, now: u64) -> Result<(), CreditManagerError> {
        if amount == 0 {
            return Err(CreditManagerError::ZeroAmount);
        }
        let state = self.state.lock().await;
        if state.paused {
            return Err(CreditManagerError::Paused);
        }

        let mut record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;

        let apr = state.vault.fixed_apr_bps().await;
        let interest = record.accrued_interest(apr, now);

        let interest_paid = amount.min(interest);
        let remainder = amount - interest_paid;
        let principal_paid = remainder.min(record.current_debt);
        let actually_paid = interest_paid + principal_paid;

        record.current_debt -= principal_paid;
        record.interest_owed = interest - interest_paid;
        record.last_debt_update_timestamp = now;

        state.vault.repay_funds(actually_paid, now).await?;
        self.store.update_borrower(borrower, record).await?;
        drop(state);

        self.sink.emit(CoreEvent::Repaid {
            borrower: hex20(borrower),
            amount: actually_paid,
            interest_paid,
            principal_paid,
        });
        Ok(())
    }

    pub async fn freeze_borrower(&self, borrower: [u8; 20]) -> Result<(), CreditManagerError> {
        let mut record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        record.status = BorrowerStatus::Frozen;
        self.store.update_borrower(borrower, record).await?;
        self.sink.emit(CoreEvent::BorrowerFrozen { borrower: hex20(borrower) });
        Ok(())
    }

    pub async fn unfreeze_borrower(&self, borrower: [u8; 20]) -> Result<(), CreditManagerError> {
        let mut record = self
            .store
            .get_borrower(&borrower)
            .await?
            .ok_or(CreditManagerError::BorrowerNotRegistered)?;
        record.status = BorrowerStatus::Active;
        self.store.update_borrower(borrower, record).await?;
        self.sink.emit(CoreEvent::BorrowerUnfrozen { borrower: hex20(borrower) });
        Ok(())
    }

    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
        self.sink.emit(CoreEvent::Paused);
    }

    pub async fn unpause(&self) {
        self.state.lock().await.paused = false;
        self.sink.emit(CoreEvent::Unpaused);
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    pub async fn set_verifier(&self, verifier: Arc<dyn VerifierAdapter>) {
        self.state.lock().await.verifier = verifier;
        self.sink.emit(CoreEvent::VerifierChanged);
    }

    pub async fn set_vault(&self, vault: Arc<LiquidityVault>) {
        self.state.lock().await.vault = vault;
        self.sink.emit(CoreEvent::VaultChanged);
    }

    pub async fn set_risk_config(&self, risk_params: RiskParameters) {
        self.state.lock().await.risk_params = risk_params;
        self.sink.emit(CoreEvent::RiskConfigChanged);
    }

    pub async fn set_pool_registry(&self, pool_registry: String) {
        self.state.lock().await.pool_registry = Some(pool_registry);
    }

    pub async fn get_pool_registry(&self) -> Option<String> {
        self.state.lock().await.pool_registry.clone()
    }

    pub async fn risk_params(&self) -> RiskParameters {
        self.state.lock().await.risk_params
    }
}
