//! Hash value type shared by every layer of the tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{SmtError, SmtResult, HASH_LENGTH};

/// A 256-bit hash used both as node hashes and as leaf keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct HashValue([u8; HASH_LENGTH]);

impl HashValue {
    /// The zero hash (all zeros).
    pub const ZERO: HashValue = HashValue([0u8; HASH_LENGTH]);

    /// Create a new HashValue from a fixed-size array.
    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create a HashValue from a slice, failing on wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> SmtResult<Self> {
        if bytes.len() != HASH_LENGTH {
            return Err(SmtError::InvalidHashLength {
                expected: HASH_LENGTH,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to a Vec<u8>.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Get the bit at the given index (0-255).
    ///
    /// Index 0 is the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < HASH_LENGTH * 8, "bit index out of bounds");
        let byte = self.0[index / 8];
        let bit_pos = 7 - (index % 8);
        (byte >> bit_pos) & 1 == 1
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self)
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LENGTH]> for HashValue {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_accessor() {
        let mut bytes = [0u8; HASH_LENGTH];
        bytes[0] = 0x80;
        bytes[31] = 0x01;
        let hash = HashValue::new(bytes);

        assert!(hash.bit(0)); // MSB of first byte
        assert!(!hash.bit(1));
        assert!(hash.bit(255)); // LSB of last byte
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(HashValue::from_slice(&[0u8; 31]).is_err());
        assert!(HashValue::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_display_is_hex() {
        let hash = HashValue::new([0xAB; HASH_LENGTH]);
        assert!(format!("{}", hash).starts_with("0xabab"));
    }
}
