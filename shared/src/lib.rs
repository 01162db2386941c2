// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared, engine-independent types for the LASER symbolic EVM: account
//! addresses, the opcode table, disassembly records, reported issues and the
//! ABI helpers used to render transaction witnesses.

pub mod abi;
pub mod address;
pub mod disasm;
pub mod issue;
pub mod opcode;
pub mod swc;

/// The width, in bits, of an EVM machine word.
pub const WORD_BITS: u32 = 256;

/// The width, in bytes, of an EVM machine word.
pub const WORD_BYTES: usize = 32;

/// Maximum depth of the EVM operand stack.
pub const STACK_LIMIT: usize = 1024;

/// Number of reserved precompile addresses (`0x01..=0x09`).
pub const PRECOMPILE_COUNT: u64 = 9;
