//! Share-accounted liquidity vault.
//!
//! Custodies a single fungible asset on behalf of liquidity providers and
//! lends it out to the credit manager at a fixed APR. Share price is
//! `totalAssets() / totalShares()`, and `totalAssets()` always folds in
//! interest accrued-but-not-yet-collected before a deposit or withdrawal
//! is priced — this is what stops an LP from being diluted by interest
//! that accrued between two of their interactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::units::accrue_interest;

pub type AccountId = String;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("insufficient liquidity: vault holds {available}, requested {requested}")]
    InsufficientLiquidity { available: u128, requested: u128 },
    #[error("insufficient shares: holder has {held}, requested {requested}")]
    InsufficientShares { held: u128, requested: u128 },
    #[error("zero amount")]
    ZeroAmount,
    #[error("asset transfer failed: {0}")]
    TransferFailed(String),
}

/// The off-core fungible-token collaborator. Implementations must
/// tolerate the safe-transfer convention: no return value on success,
/// and (for ERC20-style tokens) allowance reset-before-raise. Neither
/// of those conventions changes this trait's signature; they are the
/// implementation's problem to satisfy inside `transfer`/`transfer_in`.
#[async_trait]
pub trait AssetToken: Send + Sync {
    /// Push `amount` out of the vault's custody to `to`.
    async fn transfer(&self, to: &str, amount: u128) -> Result<(), VaultError>;
    /// Pull `amount` into the vault's custody from `from`.
    async fn transfer_in(&self, from: &str, amount: u128) -> Result<(), VaultError>;
}

/// An in-memory ledger double for tests: every account starts with an
/// effectively unlimited balance and transfers always succeed.
pub struct NullAssetToken;

#[async_trait]
impl AssetToken for NullAssetToken {
    async fn transfer(&self, _to: &str, _amount: u128) -> Result<(), VaultError> {
        Ok(())
    }
    async fn transfer_in(&self, _from: &str, _amount: u128) -> Result<(), VaultError> {
        Ok(())
    }
}

pub struct VaultState {
    pub total_shares: u128,
    pub shares_of: HashMap<AccountId, u128>,
    /// Asset actually held by the vault (not lent out).
    pub cash: u128,
    pub total_borrowed: u128,
    pub accumulated_interest: u128,
    pub last_accrual_timestamp: u64,
    pub fixed_borrow_apr_bps: u64,
    pub manager_account: Option<AccountId>,
}

impl VaultState {
    fn new(fixed_borrow_apr_bps: u64, now: u64) -> Self {
        Self {
            total_shares: 0,
            shares_of: HashMap::new(),
            cash: 0,
            total_borrowed: 0,
            accumulated_interest: 0,
            last_accrual_timestamp: now,
            fixed_borrow_apr_bps,
            manager_account: None,
        }
    }

    /// `totalAssets()` assuming accrual has already been folded into
    /// `accumulated_interest` up to the current instant.
    fn total_assets_accrued(&self) -> u128 {
        self.cash + self.total_borrowed + self.accumulated_interest
    }

    fn pending_interest(&self, now: u64) -> u128 {
        let elapsed = now.saturating_sub(self.last_accrual_timestamp);
        accrue_interest(self.total_borrowed, self.fixed_borrow_apr_bps, elapsed)
    }

    fn accrue(&mut self, now: u64) {
        let pending = self.pending_interest(now);
        self.accumulated_interest += pending;
        self.last_accrual_timestamp = now;
    }
}

/// Share-based liquidity vault. Guarded by a single mutex: every public
/// operation locks for its entire critical section, which is both the
/// reentrancy guard and the atomicity boundary the spec requires.
pub struct LiquidityVault {
    state: Mutex<VaultState>,
    asset: Arc<dyn AssetToken>,
}

impl LiquidityVault {
    pub fn new(asset: Arc<dyn AssetToken>, fixed_borrow_apr_bps: u64, now: u64) -> Self {
        Self {
            state: Mutex::new(VaultState::new(fixed_borrow_apr_bps, now)),
            asset,
        }
    }

    pub async fn set_manager(&self, manager_account: AccountId) {
        self.state.lock().await.manager_account = Some(manager_account);
    }

    pub async fn set_fixed_apr(&self, apr_bps: u64, now: u64) {
        let mut state = self.state.lock().await;
        state.accrue(now);
        state.fixed_borrow_apr_bps = apr_bps;
    }

    /// The vault's current fixed borrow APR, in basis points. The credit
    /// manager's interest accrual is keyed off this value rather than
    /// carrying its own copy, so a rate change takes effect on the very
    /// next borrow/repay/view call.
    pub async fn fixed_apr_bps(&self) -> u64 {
        self.state.lock().await.fixed_borrow_apr_bps
    }

    /// `totalAssets()`, accruing first so the figure reflects `now`
    /// exactly.
    pub async fn total_assets(&self, now: u64) -> u128 {
        let mut state = self.state.lock().await;
        state.accrue(now);
        state.total_assets_accrued()
    }

    /// Outstanding principal lent out, accruing first so the figure
    /// reflects `now` exactly.
    pub async fn total_borrowed(&self, now: u64) -> u128 {
        let mut state = self.state.lock().await;
        state.accrue(now);
        state.total_borrowed
    }

    pub async fn total_shares(&self) -> u128 {
        self.state.lock().await.total_shares
    }

    pub async fn shares_of(&self, holder: &str) -> u128 {
        *self.state.lock().await.shares_of.get(holder).unwrap_or(&0)
    }

    /// An LP deposits `amount` of the asset, minting shares priced
    /// against `totalAssets()` immediately before the deposit (1:1 for
    /// the very first deposit).
    pub async fn deposit(&self, lp: &str, amount: u128, now: u64) -> Result<u128, VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let mut state = self.state.lock().await;
        state.accrue(now);

        let shares = if state.total_shares == 0 {
            amount
        } else {
            let total_assets = state.total_assets_accrued();
            amount * state.total_shares / total_assets
        };

        *state.shares_of.entry(lp.to_string()).or_insert(0) += shares;
        state.total_shares += shares;
        state.cash += amount;
        drop(state);

        self.asset.transfer_in(lp, amount).await?;
        Ok(shares)
    }

    /// An LP burns `shares`, withdrawing their proportional claim on
    /// `totalAssets()`.
    pub async fn withdraw(&self, lp: &str, shares: u128, now: u64) -> Result<u128, VaultError> {
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let mut state = self.state.lock().await;
        state.accrue(now);

        let held = *state.shares_of.get(lp).unwrap_or(&0);
        if held < shares {
            return Err(VaultError::InsufficientShares {
                held,
                requested: shares,
            });
        }

        let total_assets = state.total_assets_accrued();
        let amount = shares * total_assets / state.total_shares;

        if state.cash < amount {
            return Err(VaultError::InsufficientLiquidity {
                available: state.cash,
                requested: amount,
            });
        }

        state.shares_of.insert(lp.to_string(), held - shares);
        state.total_shares -= shares;
        state.cash -= amount;
        drop(state);

        self.asset.transfer(lp, amount).await?;
        Ok(amount)
    }

    /// Lend `amount` to `borrower`. Manager-only by convention (enforced
    /// at the call site by which component holds a handle to this
    /// vault, not by a runtime role check — there is no wire boundary
    /// inside this crate).
    pub async fn borrow_funds(&self, borrower: &str, amount: u128, now: u64) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let mut state = self.state.lock().await;
        state.accrue(now);

        if state.cash < amount {
            return Err(VaultError::InsufficientLiquidity {
                available: state.cash,
                requested: amount,
            });
        }

        state.cash -= amount;
        state.total_borrowed += amount;
        drop(state);

        self.asset.transfer(borrower, amount).await?;
        Ok(())
    }

    /// Accept a repayment of `amount`, pulled from the manager's own
    /// account (the manager has already collected it from the
    /// borrower). Interest owed is paid down first, then principal.
    pub async fn repay_funds(&self, amount: u128, now: u64) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let mut state = self.state.lock().await;
        state.accrue(now);

        let interest_portion = amount.min(state.accumulated_interest);
        let principal_portion = amount - interest_portion;

        state.accumulated_interest -= interest_portion;
        state.total_borrowed = state.total_borrowed.saturating_sub(principal_portion);
        state.cash += amount;

        let manager_account = state
            .manager_account
            .clone()
            .ok_or_else(|| VaultError::TransferFailed("no manager account configured".into()))?;
        drop(state);

        self.asset.transfer_in(&manager_account, amount).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{STABLE_UNIT, SECONDS_PER_YEAR};

    fn vault() -> LiquidityVault {
        LiquidityVault::new(Arc::new(NullAssetToken), 1_000, 0)
    }

    #[tokio::test]
    async fn initial_deposit_mints_1_to_1() {
        let v = vault();
        let shares = v.deposit("lp1", 100_000 * STABLE_UNIT as u128, 0).await.unwrap();
        assert_eq!(shares, 100_000 * STABLE_UNIT as u128);
        assert_eq!(v.total_shares().await, shares);
    }

    #[tokio::test]
    async fn withdraw_returns_proportional_assets() {
        let v = vault();
        let shares = v.deposit("lp1", 1_000, 0).await.unwrap();
        let amount = v.withdraw("lp1", shares, 0).await.unwrap();
        assert_eq!(amount, 1_000);
        assert_eq!(v.total_shares().await, 0);
    }

    #[tokio::test]
    async fn withdraw_rejects_insufficient_shares() {
        let v = vault();
        v.deposit("lp1", 1_000, 0).await.unwrap();
        let err = v.withdraw("lp1", 2_000, 0).await.unwrap_err();
        assert_eq!(err, VaultError::InsufficientShares { held: 1_000, requested: 2_000 });
    }

    #[tokio::test]
    async fn borrow_respects_liquidity() {
        let v = vault();
        v.deposit("lp1", 1_000, 0).await.unwrap();
        let err = v.borrow_funds("borrower", 2_000, 0).await.unwrap_err();
        assert_eq!(err, VaultError::InsufficientLiquidity { available: 1_000, requested: 2_000 });

        v.borrow_funds("borrower", 500, 0).await.unwrap();
        assert_eq!(v.total_assets(0).await, 1_000);
    }

    #[tokio::test]
    async fn scenario_s6_share_dilution_safety() {
        let v = LiquidityVault::new(Arc::new(NullAssetToken), 1_000, 0);
        let lp1_shares = v.deposit("lp1", 100_000 * STABLE_UNIT as u128, 0).await.unwrap();
        assert_eq!(lp1_shares, 100_000 * STABLE_UNIT as u128);

        v.borrow_funds("borrower", 50_000 * STABLE_UNIT as u128, 0).await.unwrap();
        v.repay_funds(55_000 * STABLE_UNIT as u128, SECONDS_PER_YEAR).await.unwrap();

        let total_assets = v.total_assets(SECONDS_PER_YEAR).await;
        assert_eq!(total_assets, 105_000 * STABLE_UNIT as u128);

        let lp2_shares = v
            .deposit("lp2", 100_000 * STABLE_UNIT as u128, SECONDS_PER_YEAR)
            .await
            .unwrap();
        assert!(lp2_shares < 100_000 * STABLE_UNIT as u128);

        // LP1's claim is still worth at least what they put in plus their
        // share of the interest.
        let total_shares = v.total_shares().await;
        let total_assets_after = v.total_assets(SECONDS_PER_YEAR).await;
        let lp1_claim = lp1_shares * total_assets_after / total_shares;
        assert!(lp1_claim >= 105_000 * STABLE_UNIT as u128 - 1);
    }
}
