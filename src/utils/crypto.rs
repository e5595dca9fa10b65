//! Hashing and identifier primitives for the swaplend protocol.
//!
//! - Hashes (SHA256) for pool identifiers and state commitments
//! - Addresses identifying accounts, engines and token contracts
//! - Merkle roots over event logs

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::constants::{ADDRESS_LENGTH, HASH_LENGTH};

/// Implements hex-string serde for a fixed-size byte newtype
macro_rules! impl_hex_serde {
    ($ty:ident, $len:expr) => {
        impl ::serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let s = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(::serde::de::Error::custom)?;
                if bytes.len() != $len {
                    return Err(::serde::de::Error::custom(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    )));
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok($ty(arr))
            }
        }
    };
}

pub(crate) use impl_hex_serde;

// ═══════════════════════════════════════════════════════════════════════════════
// HASH
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte cryptographic hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LENGTH]);

impl_hex_serde!(Hash, HASH_LENGTH);

impl Hash {
    /// Create a new hash from bytes
    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Compute SHA256 hash of data
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Zero hash (all zeros)
    pub fn zero() -> Self {
        Self([0u8; HASH_LENGTH])
    }

    /// Check if hash is zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Domain-separated hash: `sha256(sha256(tag) || data)`
pub fn tagged_hash(tag: &str, data: &[u8]) -> Hash {
    let tag_hash = Hash::sha256(tag.as_bytes());
    let mut buf = Vec::with_capacity(HASH_LENGTH + data.len());
    buf.extend_from_slice(tag_hash.as_bytes());
    buf.extend_from_slice(data);
    Hash::sha256(&buf)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte account address (users, engines and token contracts)
///
/// Addresses are totally ordered by their bytes; that order is the
/// canonical asset order used for pool keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl_hex_serde!(Address, ADDRESS_LENGTH);

impl Address {
    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive a deterministic address from a human-readable label
    pub fn from_label(label: &str) -> Self {
        Self(*tagged_hash("swaplend/address", label.as_bytes()).as_bytes())
    }

    /// Create an address from a slice (must be exactly 32 bytes)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != ADDRESS_LENGTH {
            return Err(Error::InvalidParameter {
                name: "address".into(),
                reason: format!("expected {} bytes, got {}", ADDRESS_LENGTH, slice.len()),
            });
        }
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidParameter {
            name: "address".into(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }

    /// Get the address as bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form for logs
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MERKLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Compute the merkle root of a list of hashes (last node duplicated on odd levels)
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut data = [0u8; HASH_LENGTH * 2];
                data[..HASH_LENGTH].copy_from_slice(pair[0].as_bytes());
                data[HASH_LENGTH..].copy_from_slice(right.as_bytes());
                Hash::sha256(&data)
            })
            .collect();
    }
    level[0]
}
