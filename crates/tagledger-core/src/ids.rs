//! Identifiers used by the tag registry.
//!
//! A [`TokenId`] is the 32-byte keccak256 digest of a physical tag's
//! concatenated EPC and TID fields. An [`AssetId`] is the numeric identifier
//! the registry assigns when a TokenId is first registered.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::error::RegistryError;

/// keccak256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Encode a 32-byte word as a `0x`-prefixed lowercase hex string.
pub fn word_hex(word: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(word))
}

// ─── TokenId ─────────────────────────────────────────────────────────────────

/// Fixed-width identifier derived from a tag's hashed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TokenId([u8; 32]);

impl TokenId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the TokenId of a tag: `keccak256(epc || tid)`.
    pub fn from_tag(epc: &[u8], tid: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(epc.len() + tid.len());
        buf.extend_from_slice(epc);
        buf.extend_from_slice(tid);
        Self(keccak256(&buf))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The value as an indexed-topic word.
    pub fn to_topic(&self) -> String {
        word_hex(&self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&word_hex(&self.0))
    }
}

impl FromStr for TokenId {
    type Err = RegistryError;

    /// Accepts exactly `0x` followed by 64 hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").ok_or_else(|| {
            RegistryError::validation(format!("token id '{s}' must start with 0x"))
        })?;
        if digits.len() != 64 {
            return Err(RegistryError::validation(format!(
                "token id must be 32 bytes (64 hex digits), got {} digits",
                digits.len()
            )));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out).map_err(|e| {
            RegistryError::validation(format!("token id '{s}' is not valid hex: {e}"))
        })?;
        Ok(Self(out))
    }
}

impl From<TokenId> for String {
    fn from(id: TokenId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TokenId {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ─── AssetId ─────────────────────────────────────────────────────────────────

/// Registry-assigned numeric identifier, bound 1:1 to a TokenId.
/// Serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AssetId(U256);

impl AssetId {
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    /// Big-endian 32-byte word, as stored in an indexed topic.
    pub fn to_word(&self) -> [u8; 32] {
        self.0.to_be_bytes::<32>()
    }

    pub fn to_topic(&self) -> String {
        word_hex(&self.to_word())
    }
}

impl From<u64> for AssetId {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|e| RegistryError::validation(format!("asset id '{s}': {e}")))
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for AssetId {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ─── Block bounds ────────────────────────────────────────────────────────────

/// Upper (or lower) bound of a block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockBound {
    /// Resolved to the chain head with one query.
    Latest,
    Number(u64),
}

impl BlockBound {
    pub fn is_latest(self) -> bool {
        matches!(self, Self::Latest)
    }

    /// Concrete block number, reading `Latest` as `head`.
    pub fn resolve_with(self, head: u64) -> u64 {
        match self {
            Self::Latest => head,
            Self::Number(n) => n,
        }
    }
}

impl From<u64> for BlockBound {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl FromStr for BlockBound {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        s.parse::<u64>()
            .map(Self::Number)
            .map_err(|_| RegistryError::validation(format!("invalid block bound '{s}'")))
    }
}

impl fmt::Display for BlockBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
