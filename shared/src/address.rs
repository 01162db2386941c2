// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of an account address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// A 160-bit EVM account address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LENGTH]);

/// Address parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address length: {0}")]
    InvalidLength(usize),
    #[error("invalid address encoding: {0}")]
    InvalidEncoding(String),
}

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }

    /// Builds an address from a big-endian byte slice of at most 32 bytes,
    /// keeping the low 20 bytes.
    pub fn from_word(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() > 32 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(bytes);
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&word[12..]);
        Ok(Address(out))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// The address as an unsigned big-endian integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Whether this address falls in the reserved precompile range.
    pub fn precompile_index(&self) -> Option<u64> {
        let n = self.to_biguint();
        if n > BigUint::from(0u8) && n <= BigUint::from(crate::PRECOMPILE_COUNT) {
            Some(u64::try_from(n).expect("bounded above by PRECOMPILE_COUNT"))
        } else {
            None
        }
    }
}

impl From<u64> for Address {
    fn from(v: u64) -> Self {
        let mut out = [0u8; ADDRESS_LENGTH];
        out[12..].copy_from_slice(&v.to_be_bytes());
        Address(out)
    }
}

impl From<&BigUint> for Address {
    fn from(v: &BigUint) -> Self {
        let bytes = v.to_bytes_be();
        let mut out = [0u8; ADDRESS_LENGTH];
        if bytes.len() >= ADDRESS_LENGTH {
            out.copy_from_slice(&bytes[bytes.len() - ADDRESS_LENGTH..]);
        } else {
            out[ADDRESS_LENGTH - bytes.len()..].copy_from_slice(&bytes);
        }
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// Debug reads like Display; logs are full of addresses.
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let addr: Address = "0x00000000000000000000000000000000deadbeef"
            .parse()
            .unwrap();
        assert_eq!(
            addr.to_string(),
            "0x00000000000000000000000000000000deadbeef"
        );
        assert_eq!(Address::from(0xdeadbeefu64), addr);
    }

    #[test]
    fn precompile_range() {
        assert_eq!(Address::from(0).precompile_index(), None);
        assert_eq!(Address::from(1).precompile_index(), Some(1));
        assert_eq!(Address::from(9).precompile_index(), Some(9));
        assert_eq!(Address::from(10).precompile_index(), None);
    }

    #[test]
    fn from_word_truncates_to_low_160_bits() {
        let mut word = [0u8; 32];
        word[0] = 0xff;
        word[31] = 0x01;
        let addr = Address::from_word(&word).unwrap();
        assert_eq!(addr, Address::from(1));
    }
}
