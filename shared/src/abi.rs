// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Minimal Solidity ABI decoding, used to turn a solver model's concrete
//! calldata back into the argument values shown on issue witnesses. Covers
//! the static types plus dynamic arrays and `bytes`; anything richer is a
//! reporting concern outside the engine.

use num_bigint::BigUint;
use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("malformed signature: {0}")]
    BadSignature(String),
    #[error("unsupported ABI type: {0}")]
    UnsupportedType(String),
    #[error("calldata too short at offset {0}")]
    ShortCalldata(usize),
    #[error("invalid calldata encoding: {0}")]
    BadEncoding(String),
}

/// A parsed ABI parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Uint(u32),
    Int(u32),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    /// Dynamic array `T[]`.
    Array(Box<AbiType>),
}

impl AbiType {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiType::Bytes | AbiType::Array(_))
    }

    fn parse(s: &str) -> Result<Self, AbiError> {
        let s = s.trim();
        if let Some(elem) = s.strip_suffix("[]") {
            return Ok(AbiType::Array(Box::new(AbiType::parse(elem)?)));
        }
        if s == "address" {
            return Ok(AbiType::Address);
        }
        if s == "bool" {
            return Ok(AbiType::Bool);
        }
        if s == "bytes" {
            return Ok(AbiType::Bytes);
        }
        if let Some(bits) = s.strip_prefix("uint") {
            let bits = if bits.is_empty() { 256 } else { parse_bits(bits)? };
            return Ok(AbiType::Uint(bits));
        }
        if let Some(bits) = s.strip_prefix("int") {
            let bits = if bits.is_empty() { 256 } else { parse_bits(bits)? };
            return Ok(AbiType::Int(bits));
        }
        if let Some(n) = s.strip_prefix("bytes") {
            let n: usize = n
                .parse()
                .map_err(|_| AbiError::UnsupportedType(s.to_string()))?;
            if n == 0 || n > 32 {
                return Err(AbiError::UnsupportedType(s.to_string()));
            }
            return Ok(AbiType::FixedBytes(n));
        }
        Err(AbiError::UnsupportedType(s.to_string()))
    }
}

fn parse_bits(s: &str) -> Result<u32, AbiError> {
    let bits: u32 = s
        .parse()
        .map_err(|_| AbiError::UnsupportedType(s.to_string()))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(AbiError::UnsupportedType(s.to_string()));
    }
    Ok(bits)
}

/// A decoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(BigUint),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<AbiValue>),
}

/// Parses the parameter types out of a signature like
/// `transfer(address,uint256)`.
pub fn parse_signature(signature: &str) -> Result<Vec<AbiType>, AbiError> {
    let open = signature
        .find('(')
        .ok_or_else(|| AbiError::BadSignature(signature.to_string()))?;
    let close = signature
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| AbiError::BadSignature(signature.to_string()))?;
    let params = &signature[open + 1..close];
    if params.trim().is_empty() {
        return Ok(Vec::new());
    }
    params.split(',').map(AbiType::parse).collect()
}

/// Decodes `calldata` (hex, with or without the `0x` prefix) against
/// `signature`, skipping the 4-byte selector.
pub fn decode_calldata_hex(calldata: &str, signature: &str) -> Result<Vec<AbiValue>, AbiError> {
    let calldata = calldata.strip_prefix("0x").unwrap_or(calldata);
    let bytes = hex::decode(calldata).map_err(|e| AbiError::BadEncoding(e.to_string()))?;
    decode_calldata(&bytes, signature)
}

/// Decodes raw calldata (selector included) against `signature`.
pub fn decode_calldata(calldata: &[u8], signature: &str) -> Result<Vec<AbiValue>, AbiError> {
    let types = parse_signature(signature)?;
    if calldata.len() < 4 {
        return Err(AbiError::ShortCalldata(calldata.len()));
    }
    let body = &calldata[4..];
    let mut values = Vec::with_capacity(types.len());
    for (i, ty) in types.iter().enumerate() {
        let head = i * 32;
        if ty.is_dynamic() {
            let offset = to_usize(&word(body, head)?)?;
            values.push(decode_dynamic(ty, body, offset)?);
        } else {
            values.push(decode_static(ty, &word(body, head)?)?);
        }
    }
    Ok(values)
}

fn word(data: &[u8], offset: usize) -> Result<[u8; 32], AbiError> {
    let end = offset
        .checked_add(32)
        .ok_or(AbiError::ShortCalldata(offset))?;
    if end > data.len() {
        return Err(AbiError::ShortCalldata(offset));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[offset..end]);
    Ok(out)
}

fn to_usize(word: &[u8; 32]) -> Result<usize, AbiError> {
    let n = BigUint::from_bytes_be(word);
    usize::try_from(&n).map_err(|_| AbiError::BadEncoding(format!("offset out of range: {}", n)))
}

fn decode_static(ty: &AbiType, word: &[u8; 32]) -> Result<AbiValue, AbiError> {
    match ty {
        AbiType::Uint(_) | AbiType::Int(_) => Ok(AbiValue::Uint(BigUint::from_bytes_be(word))),
        AbiType::Address => Ok(AbiValue::Address(
            Address::from_word(word).expect("32-byte word"),
        )),
        AbiType::Bool => Ok(AbiValue::Bool(word[31] != 0)),
        AbiType::FixedBytes(n) => Ok(AbiValue::Bytes(word[..*n].to_vec())),
        _ => Err(AbiError::BadEncoding("dynamic type in static slot".into())),
    }
}

fn decode_dynamic(ty: &AbiType, body: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    match ty {
        AbiType::Bytes => {
            let len = to_usize(&word(body, offset)?)?;
            let start = offset + 32;
            if start + len > body.len() {
                return Err(AbiError::ShortCalldata(start));
            }
            Ok(AbiValue::Bytes(body[start..start + len].to_vec()))
        }
        AbiType::Array(elem) => {
            let len = to_usize(&word(body, offset)?)?;
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let slot = offset + 32 + i * 32;
                if elem.is_dynamic() {
                    let rel = to_usize(&word(body, slot)?)?;
                    out.push(decode_dynamic(elem, body, offset + 32 + rel)?);
                } else {
                    out.push(decode_static(elem, &word(body, slot)?)?);
                }
            }
            Ok(AbiValue::Array(out))
        }
        _ => Err(AbiError::BadEncoding("static type in dynamic slot".into())),
    }
}

/// Serde adapter serialising a [`BigUint`] as a `0x`-prefixed hex string.
pub mod biguint_hex {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        format!("0x{:x}", v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        BigUint::parse_bytes(s.as_bytes(), 16)
            .ok_or_else(|| serde::de::Error::custom("invalid hex integer"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decode_two_words() {
        let values = decode_calldata_hex(
            "0xa9059cbb00000000000000000000000000000000000000000000000000000000000000020000000000000000000000000000000000000000000000000000000000000002",
            "func(uint256,uint256)",
        )
        .unwrap();
        assert_eq!(
            values,
            vec![
                AbiValue::Uint(BigUint::from(2u8)),
                AbiValue::Uint(BigUint::from(2u8))
            ]
        );
    }

    #[test]
    fn decode_short_second_word() {
        // The second word is truncated in the raw data; decoding stops at the
        // words that are fully present.
        let values = decode_calldata_hex(
            "0xa9059cbb000000000000000000000000010801010101010120020101020401010408040402",
            "func(uint256)",
        )
        .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn decode_dynamic_uint_array() {
        let calldata = format!(
            "0xa9059cbb{}{}{}",
            format!("{:0>64}", "20"),
            format!("{:0>64}", "1"),
            format!("{:0>64}", "2"),
        );
        let values = decode_calldata_hex(&calldata, "func(uint256[])").unwrap();
        assert_eq!(
            values,
            vec![AbiValue::Array(vec![AbiValue::Uint(BigUint::from(2u8))])]
        );
    }

    #[test]
    fn signature_parsing() {
        assert_eq!(
            parse_signature("transfer(address,uint256)").unwrap(),
            vec![AbiType::Address, AbiType::Uint(256)]
        );
        assert_eq!(parse_signature("f()").unwrap(), vec![]);
        assert!(parse_signature("nope").is_err());
        assert!(parse_signature("f(uint7)").is_err());
    }
}
