//! Pure Bitcoin parsing and verification primitives.
//!
//! No state, no I/O, no async — every function here is a pure
//! transformation over bytes, following the hand-rolled header/merkle
//! parsing this codebase already used for SPV proof verification rather
//! than pulling in a general-purpose Bitcoin transaction library. All
//! hash and hash-pointer fields are handled in *internal* byte order
//! (the raw `sha256d` output); reversing to the conventional
//! human-displayed, reversed-byte order is the caller's job at the
//! system boundary, never this module's.

use ruint::aliases::U256;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("invalid header size: expected 80 bytes, got {0}")]
    InvalidHeaderSize(usize),
    #[error("varint read past end of buffer")]
    VarIntTruncated,
    #[error("buffer truncated while reading {0} bytes at offset {1}")]
    BufferTruncated(usize, usize),
}

/// A parsed 80-byte Bitcoin block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    /// Internal byte order.
    pub prev_hash: [u8; 32],
    /// Internal byte order.
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Parse the 80-byte wire layout: version(4) || prevHash(32) ||
    /// merkleRoot(32) || timestamp(4) || bits(4) || nonce(4), all
    /// little-endian.
    pub fn parse(raw: &[u8]) -> Result<Self, PrimitiveError> {
        if raw.len() != 80 {
            return Err(PrimitiveError::InvalidHeaderSize(raw.len()));
        }
        Ok(Self {
            version: i32::from_le_bytes(raw[0..4].try_into().unwrap()),
            prev_hash: raw[4..36].try_into().unwrap(),
            merkle_root: raw[36..68].try_into().unwrap(),
            timestamp: u32::from_le_bytes(raw[68..72].try_into().unwrap()),
            bits: u32::from_le_bytes(raw[72..76].try_into().unwrap()),
            nonce: u32::from_le_bytes(raw[76..80].try_into().unwrap()),
        })
    }

    /// Re-serialize to the 80-byte wire layout.
    pub fn to_raw(&self) -> [u8; 80] {
        let mut raw = [0u8; 80];
        raw[0..4].copy_from_slice(&self.version.to_le_bytes());
        raw[4..36].copy_from_slice(&self.prev_hash);
        raw[36..68].copy_from_slice(&self.merkle_root);
        raw[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        raw[72..76].copy_from_slice(&self.bits.to_le_bytes());
        raw[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        raw
    }

    /// `sha256d` of the serialized header, in internal byte order.
    pub fn hash(&self) -> [u8; 32] {
        sha256d(&self.to_raw())
    }
}

/// Bitcoin's canonical double-SHA256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

fn sha256d_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[0..32].copy_from_slice(left);
    combined[32..64].copy_from_slice(right);
    sha256d(&combined)
}

/// Decode a 32-bit compact ("nBits") difficulty representation into a
/// 256-bit target, using Bitcoin's standard rule: the low 23 bits are
/// the mantissa, bit 23 is the sign (targets are never negative in
/// practice but the bit still exists), and the high 8 bits are the
/// exponent. `exponent <= 3` shifts the mantissa right; otherwise it
/// shifts left by `8 * (exponent - 3)`.
pub fn bits_to_target(compact: u32) -> U256 {
    let exponent = (compact >> 24) as u32;
    let mantissa = U256::from(compact & 0x007f_ffff);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    }
}

/// Interpret a 32-byte hash as a little-endian 256-bit integer, matching
/// the convention used to compare a header hash against its target.
pub fn hash_to_u256_le(hash: &[u8; 32]) -> U256 {
    let mut le = *hash;
    le.reverse();
    U256::from_be_bytes(le)
}

/// Read a Bitcoin CompactSize ("varint") at `offset`, returning the
/// decoded value and the offset immediately after it.
pub fn read_varint(bytes: &[u8], offset: usize) -> Result<(u64, usize), PrimitiveError> {
    let first = *bytes
        .get(offset)
        .ok_or(PrimitiveError::VarIntTruncated)?;

    match first {
        0xff => {
            let slice = bytes
                .get(offset + 1..offset + 9)
                .ok_or(PrimitiveError::VarIntTruncated)?;
            let value = u64::from_le_bytes(slice.try_into().unwrap());
            Ok((value, offset + 9))
        }
        0xfe => {
            let slice = bytes
                .get(offset + 1..offset + 5)
                .ok_or(PrimitiveError::VarIntTruncated)?;
            let value = u32::from_le_bytes(slice.try_into().unwrap()) as u64;
            Ok((value, offset + 5))
        }
        0xfd => {
            let slice = bytes
                .get(offset + 1..offset + 3)
                .ok_or(PrimitiveError::VarIntTruncated)?;
            let value = u16::from_le_bytes(slice.try_into().unwrap()) as u64;
            Ok((value, offset + 3))
        }
        small => Ok((small as u64, offset + 1)),
    }
}

/// Recognized scriptPubKey shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    P2wpkh,
    P2pkh,
    Unsupported,
}

/// Extract the 20-byte pubkey hash from a scriptPubKey, recognizing
/// P2WPKH (`OP_0 <20>` = `00 14 <20 bytes>`) and P2PKH
/// (`OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG` =
/// `76 a9 14 <20 bytes> 88 ac`).
pub fn extract_pubkey_hash(script: &[u8]) -> ([u8; 20], ScriptType) {
    if script.len() == 22 && script[0] == 0x00 && script[1] == 0x14 {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[2..22]);
        return (hash, ScriptType::P2wpkh);
    }
    if script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        return (hash, ScriptType::P2pkh);
    }
    ([0u8; 20], ScriptType::Unsupported)
}

/// Verify a Merkle inclusion proof. At each level, if `index` is even,
/// `current = sha256d(current || sibling)`; otherwise
/// `current = sha256d(sibling || current)`; then `index >>= 1`. An empty
/// sibling list is valid iff `leaf == root`.
pub fn verify_merkle_proof(
    leaf: &[u8; 32],
    root: &[u8; 32],
    siblings: &[[u8; 32]],
    mut index: u32,
) -> bool {
    let mut current = *leaf;
    for sibling in siblings {
        current = if index % 2 == 0 {
            sha256d_pair(&current, sibling)
        } else {
            sha256d_pair(sibling, &current)
        };
        index >>= 1;
    }
    current == *root
}
