// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use laser_shared::WORD_BYTES;

use crate::smt::{bv, bv_sym, const_array, Term};

/// Transaction input data. Either a concrete byte string, fully symbolic
/// input where every byte is a distinct free variable (named after the
/// owning transaction, so witness models can be read back out), or a slice
/// of term bytes carved out of the caller's memory for a sub-call. All
/// forms answer the same read interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Calldata {
    Concrete { bytes: Vec<u8> },
    Symbolic { tx_id: String },
    /// Sub-call input: one 8-bit term per byte.
    Terms { bytes: Vec<Term> },
}

impl Calldata {
    pub fn concrete(bytes: Vec<u8>) -> Self {
        Calldata::Concrete { bytes }
    }

    pub fn symbolic(tx_id: impl Into<String>) -> Self {
        Calldata::Symbolic { tx_id: tx_id.into() }
    }

    pub fn terms(bytes: Vec<Term>) -> Self {
        Calldata::Terms { bytes }
    }

    /// The calldata length as a 256-bit term. Symbolic input has a symbolic
    /// size.
    pub fn size(&self) -> Term {
        match self {
            Calldata::Concrete { bytes } => bv(bytes.len() as u64, 256),
            Calldata::Symbolic { tx_id } => bv_sym(&format!("{}_calldatasize", tx_id), 256),
            Calldata::Terms { bytes } => bv(bytes.len() as u64, 256),
        }
    }

    /// The name of the symbol standing for byte `offset`, for symbolic
    /// calldata.
    pub fn byte_symbol_name(tx_id: &str, offset: usize) -> String {
        format!("{}_calldata_{}", tx_id, offset)
    }

    /// One byte of input as an 8-bit term. Reads past the end of concrete
    /// calldata are zero, as in the EVM.
    pub fn load_byte(&self, offset: &Term) -> Term {
        match self {
            Calldata::Concrete { bytes } => match offset.as_usize() {
                Some(o) => bv(bytes.get(o).copied().unwrap_or(0) as u64, 8),
                None => {
                    // Symbolic offset into concrete data: expose the bytes as
                    // a store chain and let the solver resolve the index.
                    let mut array = const_array(256, bv(0, 8));
                    for (i, b) in bytes.iter().enumerate() {
                        array = array.store(&bv(i as u64, 256), &bv(*b as u64, 8));
                    }
                    array.select(offset)
                }
            },
            Calldata::Symbolic { tx_id } => match offset.as_usize() {
                Some(o) => bv_sym(&Self::byte_symbol_name(tx_id, o), 8),
                None => {
                    // A read at an undecided offset collapses to one symbol
                    // per distinct offset term. Aliasing with byte-indexed
                    // reads is not tracked.
                    let mut hasher = DefaultHasher::new();
                    offset.hash(&mut hasher);
                    bv_sym(
                        &format!("{}_calldata_at_{:016x}", tx_id, hasher.finish()),
                        8,
                    )
                }
            },
            Calldata::Terms { bytes } => match offset.as_usize() {
                Some(o) => bytes.get(o).cloned().unwrap_or_else(|| bv(0, 8)),
                None => {
                    let mut array = const_array(256, bv(0, 8));
                    for (i, b) in bytes.iter().enumerate() {
                        array = array.store(&bv(i as u64, 256), b);
                    }
                    array.select(offset)
                }
            },
        }
    }

    /// A 32-byte word of input starting at `offset`, big-endian.
    pub fn load_word(&self, offset: &Term) -> Term {
        let mut word = self.load_byte(offset);
        for i in 1..WORD_BYTES {
            let byte = self.load_byte(&offset.add(&bv(i as u64, 256)));
            word = word.concat(&byte);
        }
        word
    }

    /// Concrete length, if this calldata has one.
    pub fn concrete_len(&self) -> Option<usize> {
        match self {
            Calldata::Concrete { bytes } => Some(bytes.len()),
            Calldata::Symbolic { .. } => None,
            Calldata::Terms { bytes } => Some(bytes.len()),
        }
    }

    /// The raw bytes, if fully concrete.
    pub fn concrete_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Calldata::Concrete { bytes } => Some(bytes.clone()),
            Calldata::Symbolic { .. } => None,
            Calldata::Terms { bytes } => bytes
                .iter()
                .map(|t| t.as_u64().map(|v| v as u8))
                .collect(),
        }
    }
}
