//! Identity primitives for the ledger.
//!
//! Owners and positions are identified by 32-byte values. Position IDs are
//! derived by hashing the ledger name, the owner and a per-ledger nonce, so
//! one owner can hold positions in two ledgers (during a migration) without
//! the identifiers colliding.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::constants::{HASH_LENGTH, OWNER_ID_LENGTH, POSITION_ID_LENGTH};

// ═══════════════════════════════════════════════════════════════════════════════
// HASH
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte SHA256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    /// Compute SHA256 hash
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
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OWNER ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of a position owner (an account of the funding service)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId([u8; OWNER_ID_LENGTH]);

impl Serialize for OwnerId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for OwnerId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OwnerId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl OwnerId {
    /// Create from raw bytes
    pub fn new(bytes: [u8; OWNER_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive a stable identity from a human-readable label
    pub fn from_label(label: &str) -> Self {
        Self(*Hash::sha256(label.as_bytes()).as_bytes())
    }

    /// Derive a stable identity from a numeric account index
    pub fn from_index(index: u64) -> Self {
        Self::from_label(&format!("account-{}", index))
    }

    /// Get the identity as bytes
    pub fn as_bytes(&self) -> &[u8; OWNER_ID_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidParameter {
            name: "owner_id".into(),
            reason: e.to_string(),
        })?;
        if bytes.len() != OWNER_ID_LENGTH {
            return Err(Error::InvalidParameter {
                name: "owner_id".into(),
                reason: format!("expected {} bytes, got {}", OWNER_ID_LENGTH, bytes.len()),
            });
        }
        let mut arr = [0u8; OWNER_ID_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Short representation (first 8 hex chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.short())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a position
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionId([u8; POSITION_ID_LENGTH]);

impl Serialize for PositionId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PositionId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PositionId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl PositionId {
    /// Create a new position ID from bytes
    pub fn new(bytes: [u8; POSITION_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a position ID from ledger name, owner and nonce
    pub fn generate(ledger: &str, owner: &OwnerId, nonce: u64) -> Self {
        let mut data = Vec::with_capacity(ledger.len() + OWNER_ID_LENGTH + 8);
        data.extend_from_slice(ledger.as_bytes());
        data.extend_from_slice(owner.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        Self(*Hash::sha256(&data).as_bytes())
    }

    /// Get the position ID as bytes
    pub fn as_bytes(&self) -> &[u8; POSITION_ID_LENGTH] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidParameter {
            name: "position_id".into(),
            reason: e.to_string(),
        })?;
        if bytes.len() != POSITION_ID_LENGTH {
            return Err(Error::InvalidParameter {
                name: "position_id".into(),
                reason: format!("expected {} bytes, got {}", POSITION_ID_LENGTH, bytes.len()),
            });
        }
        let mut arr = [0u8; POSITION_ID_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Short representation (first 8 hex chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionId({})", self.short())
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
