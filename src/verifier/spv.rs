//! SPV-based verifier adapter.
//!
//! Translates an [`SpvProof`] envelope into [`PayoutEvidence`] by walking
//! a header chain forward from a trusted checkpoint, checking
//! proof-of-work and difficulty continuity, verifying a Merkle inclusion
//! proof, and extracting the paid-to pubkey hash from the raw
//! transaction. Stateless with respect to replay — replay protection is
//! the credit manager's job, so a third party calling `verify_payout`
//! directly can never deny a later honest `submitPayout`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::bitcoin_primitives::{
    extract_pubkey_hash, hash_to_u256_le, read_varint, sha256d, verify_merkle_proof, BlockHeader,
    PrimitiveError, ScriptType,
};
use crate::checkpoint::{CheckpointError, CheckpointStore};

use super::{PayoutEvidence, VerifierAdapter, VerifierError};

pub const MIN_CONFIRMATIONS: usize = 6;
pub const MAX_HEADER_CHAIN: usize = 144;
pub const MAX_MERKLE_DEPTH: usize = 20;
pub const MAX_TX_SIZE: usize = 4096;
const DIFFICULTY_EPOCH_BLOCKS: u32 = 2016;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpvError {
    #[error("malformed proof envelope: {0}")]
    Decode(String),
    #[error("header chain too short: {0} headers, minimum {MIN_CONFIRMATIONS}")]
    HeaderChainTooShort(usize),
    #[error("header chain too long: {0} headers, maximum {MAX_HEADER_CHAIN}")]
    HeaderChainTooLong(usize),
    #[error("merkle proof too long: {0} siblings, maximum {MAX_MERKLE_DEPTH}")]
    MerkleProofTooLong(usize),
    #[error("raw transaction is empty")]
    TxEmpty,
    #[error("raw transaction too large: {0} bytes, maximum {MAX_TX_SIZE}")]
    TxTooLarge(usize),
    #[error("tx block index {index} out of range for {len} headers")]
    TxBlockIndexOutOfRange { index: u32, len: usize },
    #[error("no checkpoint at height {0}")]
    InvalidCheckpoint(u32),
    #[error("header chain crosses a difficulty retarget boundary")]
    RetargetBoundaryCrossing,
    #[error("header {index} prev_hash does not link to the prior header")]
    PrevHashMismatch { index: usize },
    #[error("header {index} bits {got:#010x} does not match checkpoint bits {expected:#010x}")]
    DifficultyMismatch { index: usize, expected: u32, got: u32 },
    #[error("header {0} does not satisfy its proof-of-work target")]
    InsufficientWork(usize),
    #[error("merkle proof does not verify against the claimed block's merkle root")]
    InvalidMerkleProof,
    #[error("only {0} confirmations, minimum {MIN_CONFIRMATIONS}")]
    InsufficientConfirmations(usize),
    #[error("failed to parse raw transaction: {0}")]
    TxParse(String),
    #[error("output index {0} is out of range")]
    OutputIndexOutOfRange(u32),
    #[error("scriptPubKey is not P2WPKH or P2PKH")]
    UnsupportedScript,
    #[error("borrower has no registered pubkey hash")]
    BorrowerNotRegistered,
    #[error("output pubkey hash does not match the registered borrower hash")]
    PubkeyHashMismatch,
}

impl From<PrimitiveError> for SpvError {
    fn from(e: PrimitiveError) -> Self {
        SpvError::TxParse(e.to_string())
    }
}

/// The envelope a prover submits to `verify_payout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpvProof {
    pub checkpoint_height: u32,
    /// Raw 80-byte headers, starting at `checkpoint_height + 1`.
    pub headers: Vec<[u8; 80]>,
    pub tx_block_index: u32,
    pub raw_tx: Vec<u8>,
    pub merkle_proof: Vec<[u8; 32]>,
    pub tx_index: u32,
    pub output_index: u32,
    pub borrower: [u8; 20],
}

impl SpvProof {
    /// Decode the compact binary envelope:
    /// `checkpointHeight:u32 | headerCount:u16 | headers | txBlockIndex:u32
    /// | rawTxLen:u32 | rawTx | merkleLen:u16 | merkle | txIndex:u32 |
    /// outputIndex:u32 | borrower:[u8;20]`, all integers little-endian.
    pub fn decode(bytes: &[u8]) -> Result<Self, SpvError> {
        let mut offset = 0usize;
        let take = |bytes: &[u8], offset: &mut usize, len: usize| -> Result<Vec<u8>, SpvError> {
            let slice = bytes
                .get(*offset..*offset + len)
                .ok_or_else(|| SpvError::Decode("buffer truncated".to_string()))?;
            *offset += len;
            Ok(slice.to_vec())
        };

        let checkpoint_height =
            u32::from_le_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap());

        let header_count =
            u16::from_le_bytes(take(bytes, &mut offset, 2)?.try_into().unwrap()) as usize;
        let mut headers = Vec::with_capacity(header_count);
        for _ in 0..header_count {
            let raw: [u8; 80] = take(bytes, &mut offset, 80)?.try_into().unwrap();
            headers.push(raw);
        }

        let tx_block_index =
            u32::from_le_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap());

        let raw_tx_len =
            u32::from_le_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap()) as usize;
        let raw_tx = take(bytes, &mut offset, raw_tx_len)?;

        let merkle_len =
            u16::from_le_bytes(take(bytes, &mut offset, 2)?.try_into().unwrap()) as usize;
        let mut merkle_proof = Vec::with_capacity(merkle_len);
        for _ in 0..merkle_len {
            let sib: [u8; 32] = take(bytes, &mut offset, 32)?.try_into().unwrap();
            merkle_proof.push(sib);
        }

        let tx_index = u32::from_le_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap());
        let output_index = u32::from_le_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap());
        let borrower: [u8; 20] = take(bytes, &mut offset, 20)?.try_into().unwrap();

        Ok(Self {
            checkpoint_height,
            headers,
            tx_block_index,
            raw_tx,
            merkle_proof,
            tx_index,
            output_index,
            borrower,
        })
    }

    /// Inverse of [`Self::decode`]; used by tests and by honest prover
    /// implementations to build envelopes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.checkpoint_height.to_le_bytes());
        out.extend_from_slice(&(self.headers.len() as u16).to_le_bytes());
        for h in &self.headers {
            out.extend_from_slice(h);
        }
        out.extend_from_slice(&self.tx_block_index.to_le_bytes());
        out.extend_from_slice(&(self.raw_tx.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.raw_tx);
        out.extend_from_slice(&(self.merkle_proof.len() as u16).to_le_bytes());
        for s in &self.merkle_proof {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(&self.tx_index.to_le_bytes());
        out.extend_from_slice(&self.output_index.to_le_bytes());
        out.extend_from_slice(&self.borrower);
        out
    }
}

/// A single parsed transaction output: its value and scriptPubKey.
struct ParsedOutput {
    value: u64,
    script: Vec<u8>,
}

/// Parse a raw legacy-serialized transaction (no witness data) far
/// enough to read the output at `output_index`: skip the 4-byte
/// version, skip every input (32-byte prevout hash + 4-byte prevout
/// index + varint-length scriptSig + 4-byte sequence), then read
/// outputs until `output_index`.
fn read_output(raw_tx: &[u8], output_index: u32) -> Result<ParsedOutput, SpvError> {
    let mut offset = 4usize; // skip version

    let (input_count, new_offset) = read_varint(raw_tx, offset)?;
    offset = new_offset;

    for _ in 0..input_count {
        offset += 32 + 4; // prevout hash + index
        let (script_len, new_offset) = read_varint(raw_tx, offset)?;
        offset = new_offset + script_len as usize;
        offset += 4; // sequence
    }

    let (output_count, new_offset) = read_varint(raw_tx, offset)?;
    offset = new_offset;

    if output_index as u64 >= output_count {
        return Err(SpvError::OutputIndexOutOfRange(output_index));
    }

    for i in 0..output_count {
        let value_bytes = raw_tx
            .get(offset..offset + 8)
            .ok_or_else(|| SpvError::TxParse("truncated output value".to_string()))?;
        let value = u64::from_le_bytes(value_bytes.try_into().unwrap());
        offset += 8;

        let (script_len, new_offset) = read_varint(raw_tx, offset)?;
        offset = new_offset;
        let script = raw_tx
            .get(offset..offset + script_len as usize)
            .ok_or_else(|| SpvError::TxParse("truncated output script".to_string()))?
            .to_vec();
        offset += script_len as usize;

        if i == output_index as u64 {
            return Ok(ParsedOutput { value, script });
        }
    }

    Err(SpvError::OutputIndexOutOfRange(output_index))
}

/// Stateless SPV verifier, anchored to a [`CheckpointStore`]. Holds the
/// per-borrower pubkey-hash bindings, since those are specific to this
/// adapter's evidence model rather than general credit-manager state.
pub struct SpvVerifier {
    checkpoints: Arc<CheckpointStore>,
    borrower_pubkey_hashes: RwLock<HashMap<[u8; 20], [u8; 20]>>,
}

impl SpvVerifier {
    pub fn new(checkpoints: Arc<CheckpointStore>) -> Self {
        Self {
            checkpoints,
            borrower_pubkey_hashes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_borrower_pubkey_hash(&self, borrower: [u8; 20], hash: [u8; 20]) {
        self.borrower_pubkey_hashes.write().await.insert(borrower, hash);
    }

    pub async fn get_borrower_pubkey_hash(&self, borrower: [u8; 20]) -> Option<[u8; 20]> {
        self.borrower_pubkey_hashes.read().await.get(&borrower).copied()
    }

    pub async fn verify_payout_inner(&self, proof_bytes: &[u8]) -> Result<PayoutEvidence, SpvError> {
        // Step 1: decode and bound-check the envelope.
        let proof = SpvProof::decode(proof_bytes)?;

        if proof.headers.len() < MIN_CONFIRMATIONS {
            return Err(SpvError::HeaderChainTooShort(proof.headers.len()));
        }
        if proof.headers.len() > MAX_HEADER_CHAIN {
            return Err(SpvError::HeaderChainTooLong(proof.headers.len()));
        }
        if proof.merkle_proof.len() > MAX_MERKLE_DEPTH {
            return Err(SpvError::MerkleProofTooLong(proof.merkle_proof.len()));
        }
        if proof.raw_tx.is_empty() {
            return Err(SpvError::TxEmpty);
        }
        if proof.raw_tx.len() > MAX_TX_SIZE {
            return Err(SpvError::TxTooLarge(proof.raw_tx.len()));
        }
        if proof.tx_block_index as usize >= proof.headers.len() {
            return Err(SpvError::TxBlockIndexOutOfRange {
                index: proof.tx_block_index,
                len: proof.headers.len(),
            });
        }

        // Step 2: look up the anchor checkpoint.
        let checkpoint = self
            .checkpoints
            .get_checkpoint(proof.checkpoint_height)
            .await
            .map_err(|e| match e {
                CheckpointError::NotFound(h) => SpvError::InvalidCheckpoint(h),
                CheckpointError::NotMonotonic { .. } => {
                    SpvError::InvalidCheckpoint(proof.checkpoint_height)
                }
            })?;

        // Step 3: confine verification to a single difficulty epoch.
        let target_height = checkpoint.height + proof.headers.len() as u32;
        if checkpoint.height / DIFFICULTY_EPOCH_BLOCKS != target_height / DIFFICULTY_EPOCH_BLOCKS {
            return Err(SpvError::RetargetBoundaryCrossing);
        }

        // Step 4: walk the header chain, checking linkage, difficulty
        // uniformity, and proof-of-work.
        let mut prior = checkpoint.block_hash;
        let mut tx_merkle_root = [0u8; 32];
        for (i, raw) in proof.headers.iter().enumerate() {
            let header = BlockHeader::parse(raw)?;
            if header.prev_hash != prior {
                return Err(SpvError::PrevHashMismatch { index: i });
            }
            if header.bits != checkpoint.bits {
                return Err(SpvError::DifficultyMismatch {
                    index: i,
                    expected: checkpoint.bits,
                    got: header.bits,
                });
            }
            let hash = header.hash();
            let target = crate::bitcoin_primitives::bits_to_target(header.bits);
            if hash_to_u256_le(&hash) > target {
                return Err(SpvError::InsufficientWork(i));
            }
            if i == proof.tx_block_index as usize {
                tx_merkle_root = header.merkle_root;
            }
            prior = hash;
        }

        // Step 5: confirmation depth, measured from the tip.
        let confirmations = proof.headers.len() - proof.tx_block_index as usize;
        if confirmations < MIN_CONFIRMATIONS {
            return Err(SpvError::InsufficientConfirmations(confirmations));
        }
        let block_height = checkpoint.height + 1 + proof.tx_block_index;
        let block_timestamp = BlockHeader::parse(&proof.headers[proof.tx_block_index as usize])?
            .timestamp;

        // Step 6: Merkle inclusion.
        let txid = sha256d(&proof.raw_tx);
        if !verify_merkle_proof(&txid, &tx_merkle_root, &proof.merkle_proof, proof.tx_index) {
            return Err(SpvError::InvalidMerkleProof);
        }

        // Step 7: locate the claimed output.
        let output = read_output(&proof.raw_tx, proof.output_index)?;

        // Step 8: the output must pay the borrower's registered pubkey hash.
        let (hash, script_type) = extract_pubkey_hash(&output.script);
        if script_type == ScriptType::Unsupported {
            return Err(SpvError::UnsupportedScript);
        }
        let expected = self
            .get_borrower_pubkey_hash(proof.borrower)
            .await
            .ok_or(SpvError::BorrowerNotRegistered)?;
        if hash != expected {
            return Err(SpvError::PubkeyHashMismatch);
        }

        // Step 9: emit the evidence.
        Ok(PayoutEvidence {
            borrower: proof.borrower,
            txid,
            vout: proof.output_index,
            amount_sats: output.value,
            block_height,
            block_timestamp,
        })
    }
}

#[async_trait]
impl VerifierAdapter for SpvVerifier {
    async fn verify_payout(&self, proof_bytes: &[u8]) -> Result<PayoutEvidence, VerifierError> {
        self.verify_payout_inner(proof_bytes)
            .await
            .map_err(VerifierError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin_primitives::bits_to_target;
    use crate::events::NullEventSink;

    const EASY_BITS: u32 = 0x207f_ffff; // regtest-style trivial difficulty.

    fn mine_header(prev_hash: [u8; 32], merkle_root: [u8; 32], bits: u32) -> [u8; 80] {
        let target = bits_to_target(bits);
        for nonce in 0u32..1_000_000 {
            let header = BlockHeader {
                version: 1,
                prev_hash,
                merkle_root,
                timestamp: 1_700_000_000,
                bits,
                nonce,
            };
            let hash = header.hash();
            if hash_to_u256_le(&hash) <= target {
                return header.to_raw();
            }
        }
        panic!("failed to mine a header under EASY_BITS in the test budget");
    }

    fn simple_tx(value: u64, pubkey_hash: [u8; 20]) -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1i32.to_le_bytes()); // version
        tx.push(0x00); // 0 inputs (varint)
        tx.push(0x01); // 1 output (varint)
        tx.extend_from_slice(&value.to_le_bytes());
        tx.push(22); // script length (varint)
        tx.push(0x00);
        tx.push(0x14);
        tx.extend_from_slice(&pubkey_hash);
        tx
    }

    async fn build_verifier() -> (SpvVerifier, [u8; 20]) {
        let sink = Arc::new(NullEventSink);
        let checkpoints = Arc::new(CheckpointStore::new(sink));
        checkpoints
            .set_checkpoint(1000, [0xaa; 32], [0; 32], 1_699_000_000, EASY_BITS)
            .await
            .unwrap();
        let verifier = SpvVerifier::new(checkpoints);
        let borrower = [0x42; 20];
        let pubkey_hash = [0x11; 20];
        verifier.set_borrower_pubkey_hash(borrower, pubkey_hash).await;
        (verifier, borrower)
    }

    fn chain_of(len: usize, pubkey_hash: [u8; 20], value: u64) -> (Vec<[u8; 80]>, Vec<u8>) {
        let tx = simple_tx(value, pubkey_hash);
        let txid = sha256d(&tx);
        let mut prev = [0xaa; 32];
        let mut headers = Vec::with_capacity(len);
        for i in 0..len {
            // The first header's merkle root commits to our single-tx
            // block (merkle root of one leaf == the leaf itself); the
            // rest can commit to anything.
            let merkle_root = if i == 0 { txid } else { [i as u8; 32] };
            let raw = mine_header(prev, merkle_root, EASY_BITS);
            prev = BlockHeader::parse(&raw).unwrap().hash();
            headers.push(raw);
        }
        (headers, tx)
    }

    #[tokio::test]
    async fn accepts_a_well_formed_proof() {
        let (verifier, borrower) = build_verifier().await;
        let (headers, tx) = chain_of(6, [0x11; 20], 100_000_000);

        let proof = SpvProof {
            checkpoint_height: 1000,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };

        let evidence = verifier.verify_payout_inner(&proof.encode()).await.unwrap();
        assert_eq!(evidence.borrower, borrower);
        assert_eq!(evidence.amount_sats, 100_000_000);
        assert_eq!(evidence.block_height, 1001);
        assert_eq!(evidence.vout, 0);
    }

    #[tokio::test]
    async fn rejects_header_chain_below_min_confirmations() {
        let (verifier, borrower) = build_verifier().await;
        let (headers, tx) = chain_of(5, [0x11; 20], 100_000_000);
        let proof = SpvProof {
            checkpoint_height: 1000,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::HeaderChainTooShort(5));
    }

    #[tokio::test]
    async fn rejects_header_chain_above_max_length() {
        let (verifier, borrower) = build_verifier().await;
        let (headers, tx) = chain_of(145, [0x11; 20], 100_000_000);
        let proof = SpvProof {
            checkpoint_height: 1000,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::HeaderChainTooLong(145));
    }

    #[tokio::test]
    async fn rejects_depth_below_min_confirmations_at_chain_tip() {
        // length 6, but the tx is in the *last* header: depth 1 < 6.
        let (verifier, borrower) = build_verifier().await;
        let tx = simple_tx(100_000_000, [0x11; 20]);
        let txid = sha256d(&tx);
        let mut prev = [0xaa; 32];
        let mut headers = Vec::new();
        for i in 0..6 {
            let merkle_root = if i == 5 { txid } else { [i as u8; 32] };
            let raw = mine_header(prev, merkle_root, EASY_BITS);
            prev = BlockHeader::parse(&raw).unwrap().hash();
            headers.push(raw);
        }
        let proof = SpvProof {
            checkpoint_height: 1000,
            headers,
            tx_block_index: 5,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::InsufficientConfirmations(1));
    }

    #[tokio::test]
    async fn rejects_retarget_boundary_crossing() {
        let sink = Arc::new(NullEventSink);
        let checkpoints = Arc::new(CheckpointStore::new(sink));
        checkpoints
            .set_checkpoint(2015, [0xaa; 32], [0; 32], 0, EASY_BITS)
            .await
            .unwrap();
        let verifier = SpvVerifier::new(checkpoints);
        let borrower = [0x42; 20];
        verifier.set_borrower_pubkey_hash(borrower, [0x11; 20]).await;

        let (headers, tx) = chain_of(6, [0x11; 20], 1);
        // checkpoint_height 2015 + 6 headers = target 2021; 2015/2016=0,
        // 2021/2016=1: crosses the boundary.
        let proof = SpvProof {
            checkpoint_height: 2015,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::RetargetBoundaryCrossing);
    }

    #[tokio::test]
    async fn rejects_mismatched_pubkey_hash() {
        let (verifier, borrower) = build_verifier().await;
        // Pays a *different* pubkey hash than the one registered.
        let (headers, tx) = chain_of(6, [0x99; 20], 100_000_000);
        let proof = SpvProof {
            checkpoint_height: 1000,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::PubkeyHashMismatch);
    }

    #[tokio::test]
    async fn rejects_unknown_checkpoint() {
        let (verifier, borrower) = build_verifier().await;
        let (headers, tx) = chain_of(6, [0x11; 20], 1);
        let proof = SpvProof {
            checkpoint_height: 999,
            headers,
            tx_block_index: 0,
            raw_tx: tx,
            merkle_proof: vec![],
            tx_index: 0,
            output_index: 0,
            borrower,
        };
        let err = verifier.verify_payout_inner(&proof.encode()).await.unwrap_err();
        assert_eq!(err, SpvError::InvalidCheckpoint(999));
    }

    #[test]
    fn proof_round_trips_through_encode_decode() {
        let proof = SpvProof {
            checkpoint_height: 42,
            headers: vec![[0u8; 80]; 2],
            tx_block_index: 1,
            raw_tx: vec![1, 2, 3],
            merkle_proof: vec![[7u8; 32]],
            tx_index: 3,
            output_index: 0,
            borrower: [9u8; 20],
        };
        let decoded = SpvProof::decode(&proof.encode()).unwrap();
        assert_eq!(decoded, proof);
    }
}
