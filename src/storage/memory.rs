//! In-memory [`CreditStore`], for tests and non-durable deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{CreditStore, StorageError, StorageResult};
use crate::credit_manager::BorrowerRecord;

#[derive(Default)]
struct Inner {
    borrowers: HashMap<[u8; 20], BorrowerRecord>,
    processed: HashSet<([u8; 32], u32)>,
}

/// Thread-safe in-memory `CreditStore`. Data does not survive a restart.
#[derive(Clone)]
pub struct MemoryCreditStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCreditStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for MemoryCreditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CreditStore for MemoryCreditStore {
    async fn register_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.borrowers.contains_key(&borrower) {
            return Err(StorageError::Duplicate(hex::encode(borrower)));
        }
        inner.borrowers.insert(borrower, record);
        Ok(())
    }

    async fn get_borrower(&self, borrower: &[u8; 20]) -> StorageResult<Option<BorrowerRecord>> {
        Ok(self.inner.read().await.borrowers.get(borrower).cloned())
    }

    async fn update_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.borrowers.contains_key(&borrower) {
            return Err(StorageError::NotFound(hex::encode(borrower)));
        }
        inner.borrowers.insert(borrower, record);
        Ok(())
    }

    async fn is_processed(&self, txid: [u8; 32], vout: u32) -> StorageResult<bool> {
        Ok(self.inner.read().await.processed.contains(&(txid, vout)))
    }

    async fn apply_payout(
        &self,
        borrower: [u8; 20],
        txid: [u8; 32],
        vout: u32,
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.processed.insert((txid, vout));
        inner.borrowers.insert(borrower, record);
        Ok(())
    }
}
