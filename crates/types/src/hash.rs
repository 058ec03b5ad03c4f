use blake3::Hasher as Blake3;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes in every digest produced by the agreement core.
pub const HASH_BYTES: usize = 32;

/// 32-byte BLAKE3 digest used for event identities, state roots and
/// running hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_BYTES]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_BYTES]);

    /// Hash an arbitrary byte string.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake3::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    /// Hash a domain-separated sequence of byte chunks.
    pub fn digest_parts(domain: &[u8], parts: &[&[u8]]) -> Self {
        let mut hasher = Blake3::new();
        hasher.update(domain);
        for part in parts {
            hasher.update(&(part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self::from_hasher(hasher)
    }

    pub fn from_hasher(hasher: Blake3) -> Self {
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASH_BYTES];
        bytes.copy_from_slice(&digest.as_bytes()[..HASH_BYTES]);
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; HASH_BYTES];
        hex::decode_to_slice(value.trim(), &mut bytes)?;
        Ok(Hash(bytes))
    }

    /// Byte-wise XOR, used to whiten hashes before ordering.
    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = [0u8; HASH_BYTES];
        for (idx, byte) in out.iter_mut().enumerate() {
            *byte = self.0[idx] ^ other.0[idx];
        }
        Hash(out)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..12])
    }
}

/// Identifier of a member in the address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Nanosecond precision wall-clock or consensus timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(now.as_nanos() as u64)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn plus_nanos(&self, nanos: u64) -> Self {
        Timestamp(self.0.saturating_add(nanos))
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0 as i64)
    }

    /// RFC 3339 rendering with nanosecond precision.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }

    pub fn parse_rfc3339(value: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(value.trim())?;
        let nanos = parsed
            .with_timezone(&Utc)
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .max(0);
        Ok(Timestamp(nanos as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
