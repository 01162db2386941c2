// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deterministic transformers for the nine reserved precompile addresses.
//! Precompiles only run on fully concrete calldata; a symbolic payload
//! surfaces as [`NativeError`] and the call site degrades to an unmodelled
//! success. An empty output vector means the precompile itself failed
//! (invalid point, bad signature), which the EVM reports as an empty return
//! buffer.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use ripemd::Ripemd160;
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// An error during a native call. The dispatcher treats these as unmodelled
/// successes returning symbolic bytes.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("symbolic input to native contract")]
    SymbolicInput,
    #[error("malformed native call payload: {0}")]
    Malformed(String),
}

type NativeResult = Result<Vec<u8>, NativeError>;

/// Runs the precompile at `address` (1..=9) over concrete input.
pub fn execute(address: u64, data: &[u8]) -> NativeResult {
    match address {
        1 => ecrecover(data),
        2 => sha256(data),
        3 => ripemd160(data),
        4 => identity(data),
        5 => mod_exp(data),
        6 => ec_add(data),
        7 => ec_mul(data),
        8 => ec_pair(data),
        9 => blake2f(data),
        _ => Err(NativeError::Malformed(format!(
            "no precompile at address {}",
            address
        ))),
    }
}

/// Reads the 32-byte word at `offset`, zero-extended past the end of input
/// as the EVM does.
fn extract32(data: &[u8], offset: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = data.get(offset + i).copied().unwrap_or(0);
    }
    out
}

fn extract_range(data: &[u8], offset: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| data.get(offset + i).copied().unwrap_or(0))
        .collect()
}

const SECP256K1_N: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
    0x41, 0x41,
];

/// `(hash, v, r, s)` → `0^12 ++ keccak256(pubkey)[12..]`, or empty output on
/// any invalid signature component.
fn ecrecover(data: &[u8]) -> NativeResult {
    let hash = extract32(data, 0);
    let v_word = extract32(data, 32);
    let r = extract32(data, 64);
    let s = extract32(data, 96);

    let n = BigUint::from_bytes_be(&SECP256K1_N);
    let v = BigUint::from_bytes_be(&v_word);
    if BigUint::from_bytes_be(&r) >= n
        || BigUint::from_bytes_be(&s) >= n
        || v < BigUint::from(27u8)
        || v > BigUint::from(28u8)
    {
        return Ok(Vec::new());
    }
    let recovery_id = (v_word[31] - 27) as u8;

    let message = libsecp256k1::Message::parse(&hash);
    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&r);
    sig_bytes[32..].copy_from_slice(&s);
    let signature = match libsecp256k1::Signature::parse_standard(&sig_bytes) {
        Ok(sig) => sig,
        Err(_) => return Ok(Vec::new()),
    };
    let recovery_id = match libsecp256k1::RecoveryId::parse(recovery_id) {
        Ok(id) => id,
        Err(_) => return Ok(Vec::new()),
    };
    let pubkey = match libsecp256k1::recover(&message, &signature, &recovery_id) {
        Ok(key) => key,
        Err(e) => {
            log::debug!("public key recovery failed: {:?}", e);
            return Ok(Vec::new());
        }
    };

    // Uncompressed serialisation is 0x04 ++ x ++ y; the address hashes the
    // raw 64-byte point.
    let serialized = pubkey.serialize();
    let digest = Keccak256::digest(&serialized[1..]);
    let mut out = vec![0u8; 12];
    out.extend_from_slice(&digest[12..]);
    Ok(out)
}

fn sha256(data: &[u8]) -> NativeResult {
    Ok(Sha256::digest(data).to_vec())
}

fn ripemd160(data: &[u8]) -> NativeResult {
    let mut out = vec![0u8; 12];
    out.extend_from_slice(&Ripemd160::digest(data));
    Ok(out)
}

fn identity(data: &[u8]) -> NativeResult {
    Ok(data.to_vec())
}

/// EIP-198 modular exponentiation:
/// `(baselen, explen, modlen, base, exp, mod)`.
fn mod_exp(data: &[u8]) -> NativeResult {
    let word_usize = |offset: usize, what: &str| -> Result<usize, NativeError> {
        let word = BigUint::from_bytes_be(&extract32(data, offset));
        usize::try_from(&word)
            .ok()
            .filter(|len| *len <= 1 << 20)
            .ok_or_else(|| NativeError::Malformed(format!("{} out of range: {}", what, word)))
    };
    let baselen = word_usize(0, "base length")?;
    let explen = word_usize(32, "exponent length")?;
    let modlen = word_usize(64, "modulus length")?;
    if modlen == 0 {
        return Ok(Vec::new());
    }

    let base = BigUint::from_bytes_be(&extract_range(data, 96, baselen));
    let exponent = BigUint::from_bytes_be(&extract_range(data, 96 + baselen, explen));
    let modulus = BigUint::from_bytes_be(&extract_range(data, 96 + baselen + explen, modlen));

    let result = if modulus.is_zero() || modulus.is_one() {
        BigUint::zero()
    } else {
        base.modpow(&exponent, &modulus)
    };

    let bytes = result.to_bytes_be();
    let mut out = vec![0u8; modlen - bytes.len().min(modlen)];
    out.extend_from_slice(&bytes[bytes.len().saturating_sub(modlen)..]);
    Ok(out)
}

fn read_fq(data: &[u8], offset: usize) -> Option<bn::Fq> {
    bn::Fq::from_slice(&extract32(data, offset)).ok()
}

/// Reads an EVM-encoded G1 point; `(0, 0)` is the point at infinity.
fn read_g1(data: &[u8], offset: usize) -> Option<bn::G1> {
    use bn::{AffineG1, Fq, Group, G1};
    let x = read_fq(data, offset)?;
    let y = read_fq(data, offset + 32)?;
    if x == Fq::zero() && y == Fq::zero() {
        Some(G1::zero())
    } else {
        AffineG1::new(x, y).ok().map(Into::into)
    }
}

fn write_g1(point: bn::G1) -> Vec<u8> {
    use bn::AffineG1;
    let mut out = vec![0u8; 64];
    if let Some(affine) = AffineG1::from_jacobian(point) {
        affine
            .x()
            .to_big_endian(&mut out[..32])
            .expect("32-byte buffer");
        affine
            .y()
            .to_big_endian(&mut out[32..])
            .expect("32-byte buffer");
    }
    out
}

fn ec_add(data: &[u8]) -> NativeResult {
    let p1 = match read_g1(data, 0) {
        Some(p) => p,
        None => return Ok(Vec::new()),
    };
    let p2 = match read_g1(data, 64) {
        Some(p) => p,
        None => return Ok(Vec::new()),
    };
    Ok(write_g1(p1 + p2))
}

fn ec_mul(data: &[u8]) -> NativeResult {
    let point = match read_g1(data, 0) {
        Some(p) => p,
        None => return Ok(Vec::new()),
    };
    let scalar = match bn::Fr::from_slice(&extract32(data, 64)) {
        Ok(s) => s,
        Err(_) => return Ok(Vec::new()),
    };
    Ok(write_g1(point * scalar))
}

/// Pairing check over `len / 192` point pairs; returns a boolean word.
/// G2 coordinates arrive imaginary-part first.
fn ec_pair(data: &[u8]) -> NativeResult {
    use bn::{AffineG2, Fq2, Group, Gt, G2};

    if data.len() % 192 != 0 {
        return Ok(Vec::new());
    }
    let mut pairs = Vec::with_capacity(data.len() / 192);
    for chunk in 0..data.len() / 192 {
        let offset = chunk * 192;
        let g1 = match read_g1(data, offset) {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let x_imag = read_fq(data, offset + 64);
        let x_real = read_fq(data, offset + 96);
        let y_imag = read_fq(data, offset + 128);
        let y_real = read_fq(data, offset + 160);
        let (x_imag, x_real, y_imag, y_real) = match (x_imag, x_real, y_imag, y_real) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Ok(Vec::new()),
        };
        let x = Fq2::new(x_real, x_imag);
        let y = Fq2::new(y_real, y_imag);
        let g2 = if x.is_zero() && y.is_zero() {
            G2::zero()
        } else {
            match AffineG2::new(x, y) {
                Ok(p) => p.into(),
                Err(_) => return Ok(Vec::new()),
            }
        };
        pairs.push((g1, g2));
    }
    let ok = bn::pairing_batch(&pairs) == Gt::one();
    let mut out = vec![0u8; 32];
    out[31] = ok as u8;
    Ok(out)
}

const BLAKE2B_IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

const BLAKE2B_SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

#[allow(clippy::many_single_char_names)]
fn blake2b_g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

/// The EIP-152 blake2b `F` compression-function round. The payload is
/// exactly 213 bytes: rounds ++ h ++ m ++ t ++ final-flag; anything else is
/// a failed call (empty output).
fn blake2f(data: &[u8]) -> NativeResult {
    if data.len() != 213 {
        return Ok(Vec::new());
    }
    let rounds = u32::from_be_bytes(data[0..4].try_into().expect("length checked"));
    let flag = data[212];
    if flag > 1 {
        return Ok(Vec::new());
    }

    let mut h = [0u64; 8];
    for (i, h_i) in h.iter_mut().enumerate() {
        *h_i = u64::from_le_bytes(data[4 + i * 8..12 + i * 8].try_into().expect("length checked"));
    }
    let mut m = [0u64; 16];
    for (i, m_i) in m.iter_mut().enumerate() {
        *m_i = u64::from_le_bytes(
            data[68 + i * 8..76 + i * 8].try_into().expect("length checked"),
        );
    }
    let t0 = u64::from_le_bytes(data[196..204].try_into().expect("length checked"));
    let t1 = u64::from_le_bytes(data[204..212].try_into().expect("length checked"));

    let mut v = [0u64; 16];
    v[..8].copy_from_slice(&h);
    v[8..].copy_from_slice(&BLAKE2B_IV);
    v[12] ^= t0;
    v[13] ^= t1;
    if flag == 1 {
        v[14] = !v[14];
    }

    for round in 0..rounds as usize {
        let s = &BLAKE2B_SIGMA[round % 10];
        blake2b_g(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        blake2b_g(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        blake2b_g(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        blake2b_g(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
        blake2b_g(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        blake2b_g(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        blake2b_g(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        blake2b_g(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    let mut out = Vec::with_capacity(64);
    for i in 0..8 {
        out.extend_from_slice(&(h[i] ^ v[i] ^ v[i + 8]).to_le_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_round_trips() {
        assert_eq!(execute(4, &[]).unwrap(), Vec::<u8>::new());
        assert_eq!(execute(4, &[10, 20]).unwrap(), vec![10, 20]);
        assert_eq!(execute(4, &[0xde, 0xad, 0xbe, 0xef]).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn sha256_matches_reference() {
        // SHA-256 of the empty string.
        assert_eq!(
            hex::encode(execute(2, &[]).unwrap()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(execute(2, b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ripemd160_is_left_padded() {
        let out = execute(3, b"abc").unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(&out[..12], &[0u8; 12]);
        // RIPEMD-160 of "abc".
        assert_eq!(
            hex::encode(&out[12..]),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn ecrecover_rejects_out_of_range_components() {
        // v = 29 is outside {27, 28}.
        let mut input = vec![0u8; 128];
        input[63] = 29;
        assert_eq!(execute(1, &input).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn ecrecover_recovers_a_known_signer() {
        // Vector from the go-ethereum core/vm precompile tests.
        let input = hex::decode(concat!(
            "38d18acb67d25c8bb9942764b62f18e17054f66a817bd4295423adf9ed98873e",
            "000000000000000000000000000000000000000000000000000000000000001b",
            "38d18acb67d25c8bb9942764b62f18e17054f66a817bd4295423adf9ed98873e",
            "789d1dd423d25f0772d2748d60f7e4b81bb14d086eba8e8e8efb6dcff8a4ae02",
        ))
        .unwrap();
        assert_eq!(
            hex::encode(execute(1, &input).unwrap()),
            "000000000000000000000000ceaccac640adf55b2028469bd36ba501f28b699d"
        );
    }

    #[test]
    fn mod_exp_small_vector() {
        // 3 ^ 5 mod 7 = 5, one-byte operands.
        let mut input = Vec::new();
        input.extend_from_slice(&[0u8; 31]);
        input.push(1); // baselen
        input.extend_from_slice(&[0u8; 31]);
        input.push(1); // explen
        input.extend_from_slice(&[0u8; 31]);
        input.push(1); // modlen
        input.extend_from_slice(&[3, 5, 7]);
        assert_eq!(execute(5, &input).unwrap(), vec![5]);
    }

    #[test]
    fn mod_exp_eip_198_vector() {
        // The canonical EIP-198 example: 3 ^ (2^256 - 2^32 - 978) mod
        // 2^256 - 2^32 - 977 = 1 (Fermat).
        let input = hex::decode(concat!(
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "03",
            "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2e",
            "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f",
        ))
        .unwrap();
        let mut expected = vec![0u8; 31];
        expected.push(1);
        assert_eq!(execute(5, &input).unwrap(), expected);
    }

    #[test]
    fn mod_exp_zero_exponent_is_one() {
        // 0 ^ 0 mod 5 = 1 per EIP-198.
        let mut input = Vec::new();
        input.extend_from_slice(&[0u8; 32]); // baselen = 0
        input.extend_from_slice(&[0u8; 32]); // explen = 0
        input.extend_from_slice(&[0u8; 31]);
        input.push(1); // modlen
        input.push(5);
        assert_eq!(execute(5, &input).unwrap(), vec![1]);
    }

    #[test]
    fn ec_add_identity_element() {
        // P + 0 = P for the generator (1, 2).
        let mut input = vec![0u8; 128];
        input[31] = 1;
        input[63] = 2;
        let out = execute(6, &input).unwrap();
        assert_eq!(out.len(), 64);
        assert_eq!(out[31], 1);
        assert_eq!(out[63], 2);
    }

    #[test]
    fn ec_add_rejects_points_off_the_curve() {
        let mut input = vec![0u8; 128];
        input[31] = 1;
        input[63] = 3;
        assert_eq!(execute(6, &input).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn ec_pair_empty_input_is_true() {
        let out = execute(8, &[]).unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(out[31], 1);
    }

    #[test]
    fn ec_pair_rejects_ragged_input() {
        assert_eq!(execute(8, &[0u8; 191]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn blake2f_eip_152_vector() {
        // Test case 5 from EIP-152 (12 rounds over "abc").
        let input = hex::decode(concat!(
            "0000000c",
            "48c9bdf267e6096a3ba7ca8485ae67bb2bf894fe72f36e3cf1361d5f3af54fa5",
            "d182e6ad7f520e511f6c3e2b8c68059b6bbd41fbabd9831f79217e1319cde05b",
            "6162630000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0000000000000000000000000000000000000000000000000000000000000000",
            "0300000000000000",
            "0000000000000000",
            "01",
        ))
        .unwrap();
        assert_eq!(input.len(), 213);
        assert_eq!(
            hex::encode(execute(9, &input).unwrap()),
            concat!(
                "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1",
                "7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923"
            )
        );
    }

    #[test]
    fn blake2f_rejects_bad_lengths_and_flags() {
        assert_eq!(execute(9, &[0u8; 212]).unwrap(), Vec::<u8>::new());
        let mut input = vec![0u8; 213];
        input[212] = 2;
        assert_eq!(execute(9, &input).unwrap(), Vec::<u8>::new());
    }
}
