// Path: crates/types/src/hash.rs

//! The fixed 256-bit hash used by the Proof-of-Index chain and the MMR accumulator.

use crate::error::HashError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// The all-zero hash substituted for absent fields when hashing.
pub const ZERO_HASH: Hash32 = Hash32([0u8; 32]);

/// A 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Builds a hash from a slice, failing unless it is exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parses a hex string with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| HashError::Decode(format!("hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex form with a `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(v: [u8; 32]) -> Self {
        Hash32(v)
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes keccak-256 over the concatenation of `parts`.
pub fn keccak256<I, P>(parts: I) -> Hash32
where
    I: IntoIterator<Item = P>,
    P: AsRef<[u8]>,
{
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    Hash32(hasher.finalize().into())
}

/// A chain block hash together with the encoding the caller supplied it in.
///
/// The encoding is always explicit; strings are never classified heuristically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBlockHash {
    /// Raw bytes.
    Raw(Vec<u8>),
    /// A hex string, `0x` prefix optional.
    Hex(String),
    /// A base58 (bitcoin alphabet) string.
    Base58(String),
    /// A standard-alphabet, padded base64 string.
    Base64(String),
}

impl ChainBlockHash {
    /// Decodes into canonical raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HashError> {
        let bytes = match self {
            ChainBlockHash::Raw(b) => b.clone(),
            ChainBlockHash::Hex(s) => hex::decode(s.trim_start_matches("0x"))
                .map_err(|e| HashError::Decode(format!("hex: {}", e)))?,
            ChainBlockHash::Base58(s) => bs58::decode(s)
                .into_vec()
                .map_err(|e| HashError::Decode(format!("base58: {}", e)))?,
            ChainBlockHash::Base64(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| HashError::Decode(format!("base64: {}", e)))?,
        };
        if bytes.is_empty() {
            return Err(HashError::InvalidLength(0));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input_matches_known_vector() {
        let h = keccak256::<_, &[u8]>([]);
        assert_eq!(
            h.to_hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn keccak_concatenates_parts() {
        assert_eq!(keccak256([b"ab".as_slice(), b"cd"]), keccak256([b"abcd"]));
    }

    #[test]
    fn chain_block_hash_decodings_agree() {
        let raw = vec![0xde, 0xad, 0xbe, 0xef];
        let hex = ChainBlockHash::Hex("0xdeadbeef".into());
        let b58 = ChainBlockHash::Base58(bs58::encode(&raw).into_string());
        let b64 = ChainBlockHash::Base64(base64::engine::general_purpose::STANDARD.encode(&raw));

        assert_eq!(hex.to_bytes().unwrap(), raw);
        assert_eq!(b58.to_bytes().unwrap(), raw);
        assert_eq!(b64.to_bytes().unwrap(), raw);
        assert_eq!(ChainBlockHash::Raw(raw.clone()).to_bytes().unwrap(), raw);
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        assert!(ChainBlockHash::Hex("0xzz".into()).to_bytes().is_err());
        assert!(ChainBlockHash::Base58("0OIl".into()).to_bytes().is_err());
        assert!(ChainBlockHash::Base64("***".into()).to_bytes().is_err());
        assert!(ChainBlockHash::Raw(vec![]).to_bytes().is_err());
    }

    #[test]
    fn hash32_requires_exact_length() {
        assert!(Hash32::from_slice(&[1u8; 31]).is_err());
        assert_eq!(Hash32::from_slice(&[7u8; 32]).unwrap(), Hash32([7u8; 32]));
        let h = Hash32([0xab; 32]);
        assert_eq!(Hash32::from_hex(&h.to_hex()).unwrap(), h);
    }
}
