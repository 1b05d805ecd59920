//! Signed-oracle verifier adapter.
//!
//! An MVP/fallback `VerifierAdapter`: instead of walking a Bitcoin
//! header chain, it trusts a typed-data message signed by a single
//! authorized relayer key. Stateless — no replay cache, matching
//! `SpvVerifier`.
//!
//! Signature scheme: ECDSA over secp256k1 with public-key recovery
//! (`k256`), using a SHA-256 domain/struct hash rather than an
//! EVM-style Keccak256 typed-data hash, since nothing else in this crate
//! depends on EVM conventions and SHA-256 is already used throughout for
//! Bitcoin hashing. `authorizedSigner` is a 33-byte SEC1-compressed
//! public key, compared directly against the recovered key — this
//! sidesteps an address-derivation scheme the payload format does not
//! otherwise need.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use super::{PayoutEvidence, VerifierAdapter, VerifierError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("malformed signed payload: {0}")]
    Decode(String),
    #[error("signature deadline {deadline} has passed (now {now})")]
    DeadlineExpired { deadline: u64, now: u64 },
    #[error("signature does not recover to the authorized signer")]
    InvalidSignature,
    #[error("no authorized signer configured")]
    SignerNotConfigured,
}

/// The payload a relayer signs, before the domain separator is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OraclePayload {
    pub borrower: [u8; 20],
    pub txid: [u8; 32],
    pub vout: u32,
    pub amount_sats: u64,
    pub block_height: u32,
    pub block_timestamp: u32,
    pub deadline: u64,
}

impl OraclePayload {
    fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + 32 + 4 + 8 + 4 + 4 + 8);
        out.extend_from_slice(&self.borrower);
        out.extend_from_slice(&self.txid);
        out.extend_from_slice(&self.vout.to_be_bytes());
        out.extend_from_slice(&self.amount_sats.to_be_bytes());
        out.extend_from_slice(&self.block_height.to_be_bytes());
        out.extend_from_slice(&self.block_timestamp.to_be_bytes());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out
    }
}

/// `SignedOraclePayout` is `payload || signature (64 bytes r||s) ||
/// recovery_id (1 byte)`.
fn domain_hash(chain_id: u64, payload: &OraclePayload) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"HASHCREDIT_PAYOUT_V1");
    hasher.update(chain_id.to_be_bytes());
    hasher.update(payload.to_bytes());
    hasher.finalize().into()
}

fn current_time_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decode `payload (4+32+4+8+4+4+8 bytes, big-endian ints) || r (32) ||
/// s (32) || recovery_id (1)`.
fn decode_signed(bytes: &[u8]) -> Result<(OraclePayload, Signature, RecoveryId), OracleError> {
    if bytes.len() != 20 + 32 + 4 + 8 + 4 + 4 + 8 + 64 + 1 {
        return Err(OracleError::Decode("unexpected payload length".to_string()));
    }
    let mut offset = 0usize;
    let mut borrower = [0u8; 20];
    borrower.copy_from_slice(&bytes[offset..offset + 20]);
    offset += 20;
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&bytes[offset..offset + 32]);
    offset += 32;
    let vout = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let amount_sats = u64::from_be_bytes(bytes[offset..offset + 8].try_into().unwrap());
    offset += 8;
    let block_height = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let block_timestamp = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());
    offset += 4;
    let deadline = u64::from_be_bytes(bytes[offset..offset + 8].try_into().unwrap());
    offset += 8;

    let sig_bytes = &bytes[offset..offset + 64];
    let signature = Signature::from_slice(sig_bytes)
        .map_err(|e| OracleError::Decode(format!("invalid signature: {e}")))?;
    offset += 64;
    let recovery_id = RecoveryId::from_byte(bytes[offset])
        .ok_or_else(|| OracleError::Decode("invalid recovery id".to_string()))?;

    Ok((
        OraclePayload {
            borrower,
            txid,
            vout,
            amount_sats,
            block_height,
            block_timestamp,
            deadline,
        },
        signature,
        recovery_id,
    ))
}

pub struct SignedOracleVerifier {
    chain_id: u64,
    authorized_signer: RwLock<Option<[u8; 33]>>,
}

impl SignedOracleVerifier {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            authorized_signer: RwLock::new(None),
        }
    }

    pub async fn set_authorized_signer(&self, signer: [u8; 33]) {
        *self.authorized_signer.write().await = Some(signer);
    }

    pub async fn verify_payout_inner(
        &self,
        proof_bytes: &[u8],
    ) -> Result<PayoutEvidence, OracleError> {
        let (payload, signature, recovery_id) = decode_signed(proof_bytes)?;

        let now = current_time_unix();
        if payload.deadline < now {
            return Err(OracleError::DeadlineExpired {
                deadline: payload.deadline,
                now,
            });
        }

        let digest = domain_hash(self.chain_id, &payload);
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
            .map_err(|_| OracleError::InvalidSignature)?;

        let authorized = self
            .authorized_signer
            .read()
            .await
            .ok_or(OracleError::SignerNotConfigured)?;

        let recovered_bytes: [u8; 33] = recovered
            .to_encoded_point(true)
            .as_bytes()
            .try_into()
            .expect("compressed SEC1 point is always 33 bytes");

        if recovered_bytes != authorized {
            return Err(OracleError::InvalidSignature);
        }

        Ok(PayoutEvidence {
            borrower: payload.borrower,
            txid: payload.txid,
            vout: payload.vout,
            amount_sats: payload.amount_sats,
            block_height: payload.block_height,
            block_timestamp: payload.block_timestamp,
        })
    }
}

#[async_trait]
impl VerifierAdapter for SignedOracleVerifier {
    async fn verify_payout(&self, proof_bytes: &[u8]) -> Result<PayoutEvidence, VerifierError> {
        self.verify_payout_inner(proof_bytes)
            .await
            .map_err(VerifierError::from)
    }
}
