//! Checkpoint authority state.
//!
//! A sparse, monotonically-growing map from Bitcoin block height to a
//! difficulty-anchored checkpoint. This is the anchor `SpvVerifier` walks
//! forward from; it carries no dependency on anything else in the crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::events::{CoreEvent, EventSink};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint not found at height {0}")]
    NotFound(u32),
    #[error("checkpoint height {new} is not strictly greater than current latest height {current}")]
    NotMonotonic { current: u32, new: u32 },
}

/// A trusted triple anchoring a height, a block hash, and the difficulty
/// of that height's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    /// Internal byte order (raw `sha256d` output).
    pub block_hash: [u8; 32],
    pub chain_work: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
}

/// Holds the authoritative height -> Checkpoint map.
pub struct CheckpointStore {
    inner: RwLock<CheckpointStoreInner>,
    sink: Arc<dyn EventSink>,
}

struct CheckpointStoreInner {
    checkpoints: BTreeMap<u32, Checkpoint>,
    latest_height: Option<u32>,
}

impl CheckpointStore {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: RwLock::new(CheckpointStoreInner {
                checkpoints: BTreeMap::new(),
                latest_height: None,
            }),
            sink,
        }
    }

    /// Record a new checkpoint. The first write establishes
    /// `latest_height`; every subsequent write must strictly increase
    /// it. Once written, a checkpoint is immutable.
    pub async fn set_checkpoint(
        &self,
        height: u32,
        block_hash: [u8; 32],
        chain_work: [u8; 32],
        timestamp: u32,
        bits: u32,
    ) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write().await;

        if let Some(current) = inner.latest_height {
            if height <= current {
                return Err(CheckpointError::NotMonotonic {
                    current,
                    new: height,
                });
            }
        }

        inner.checkpoints.insert(
            height,
            Checkpoint {
                height,
                block_hash,
                chain_work,
                timestamp,
                bits,
            },
        );
        inner.latest_height = Some(height);

        self.sink.emit(CoreEvent::CheckpointSet { height });
        Ok(())
    }

    pub async fn get_checkpoint(&self, height: u32) -> Result<Checkpoint, CheckpointError> {
        self.inner
            .read()
            .await
            .checkpoints
            .get(&height)
            .copied()
            .ok_or(CheckpointError::NotFound(height))
    }

    pub async fn latest_checkpoint(&self) -> Option<Checkpoint> {
        let inner = self.inner.read().await;
        inner.latest_height.and_then(|h| inner.checkpoints.get(&h).copied())
    }

    pub async fn latest_checkpoint_height(&self) -> Option<u32> {
        self.inner.read().await.latest_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;

    fn store() -> (CheckpointStore, Arc<RecordingEventSink>) {
        let sink = Arc::new(RecordingEventSink::new());
        (CheckpointStore::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn first_write_establishes_latest_height() {
        let (store, _sink) = store();
        store.set_checkpoint(100, [1; 32], [0; 32], 1_700_000_000, 0x1d00_ffff).await.unwrap();
        assert_eq!(store.latest_checkpoint_height().await, Some(100));
    }

    #[tokio::test]
    async fn rejects_non_monotonic_height() {
        let (store, _sink) = store();
        store.set_checkpoint(100, [1; 32], [0; 32], 0, 0).await.unwrap();
        let err = store.set_checkpoint(100, [2; 32], [0; 32], 0, 0).await.unwrap_err();
        assert_eq!(err, CheckpointError::NotMonotonic { current: 100, new: 100 });
        let err = store.set_checkpoint(50, [2; 32], [0; 32], 0, 0).await.unwrap_err();
        assert_eq!(err, CheckpointError::NotMonotonic { current: 100, new: 50 });
    }

    #[tokio::test]
    async fn get_missing_checkpoint_fails() {
        let (store, _sink) = store();
        assert_eq!(store.get_checkpoint(5).await.unwrap_err(), CheckpointError::NotFound(5));
    }

    #[tokio::test]
    async fn emits_checkpoint_set_event() {
        let (store, sink) = store();
        store.set_checkpoint(10, [0; 32], [0; 32], 0, 0).await.unwrap();
        assert_eq!(sink.events(), vec![CoreEvent::CheckpointSet { height: 10 }]);
    }

    #[tokio::test]
    async fn checkpoints_are_immutable_once_written() {
        let (store, _sink) = store();
        store.set_checkpoint(10, [7; 32], [0; 32], 42, 99).await.unwrap();
        let cp = store.get_checkpoint(10).await.unwrap();
        assert_eq!(cp.block_hash, [7; 32]);
        assert_eq!(cp.timestamp, 42);
        assert_eq!(cp.bits, 99);
    }
}
