// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The EVM opcode table: mnemonic, operand-stack arity, immediate length and
//! a static `(min, max)` gas envelope per opcode. The envelope is an
//! analysis-time bound, not an economic gas model; dynamic components are
//! folded into `gas_max` with a fixed worst case.

use std::fmt;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Worst-case number of 32-byte words assumed for copy-style dynamic gas.
const MAX_COPY_WORDS: u64 = 24;

/// An EVM opcode byte.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Opcode(pub u8);

/// Static metadata about an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// Words popped from the stack.
    pub inputs: u8,
    /// Words pushed onto the stack.
    pub outputs: u8,
    /// Immediate bytes following the opcode (non-zero only for PUSH1..32).
    pub immediates: u8,
    pub gas_min: u64,
    pub gas_max: u64,
}

macro_rules! opcodes {
    ($(($name:ident, $byte:literal, $ins:literal, $outs:literal, $imm:literal, $gmin:expr, $gmax:expr),)*) => {
        impl Opcode {
            $(pub const $name: Opcode = Opcode($byte);)*
        }

        fn build_table() -> [Option<OpInfo>; 256] {
            let mut table: [Option<OpInfo>; 256] = [None; 256];
            $(table[$byte as usize] = Some(OpInfo {
                name: stringify!($name),
                inputs: $ins,
                outputs: $outs,
                immediates: $imm,
                gas_min: $gmin,
                gas_max: $gmax,
            });)*
            table
        }
    };
}

opcodes! {
    (STOP, 0x00, 0, 0, 0, 0, 0),
    (ADD, 0x01, 2, 1, 0, 3, 3),
    (MUL, 0x02, 2, 1, 0, 5, 5),
    (SUB, 0x03, 2, 1, 0, 3, 3),
    (DIV, 0x04, 2, 1, 0, 5, 5),
    (SDIV, 0x05, 2, 1, 0, 5, 5),
    (MOD, 0x06, 2, 1, 0, 5, 5),
    (SMOD, 0x07, 2, 1, 0, 5, 5),
    (ADDMOD, 0x08, 3, 1, 0, 8, 8),
    (MULMOD, 0x09, 3, 1, 0, 8, 8),
    (EXP, 0x0a, 2, 1, 0, 10, 10 + 50 * 32),
    (SIGNEXTEND, 0x0b, 2, 1, 0, 5, 5),
    (LT, 0x10, 2, 1, 0, 3, 3),
    (GT, 0x11, 2, 1, 0, 3, 3),
    (SLT, 0x12, 2, 1, 0, 3, 3),
    (SGT, 0x13, 2, 1, 0, 3, 3),
    (EQ, 0x14, 2, 1, 0, 3, 3),
    (ISZERO, 0x15, 1, 1, 0, 3, 3),
    (AND, 0x16, 2, 1, 0, 3, 3),
    (OR, 0x17, 2, 1, 0, 3, 3),
    (XOR, 0x18, 2, 1, 0, 3, 3),
    (NOT, 0x19, 1, 1, 0, 3, 3),
    (BYTE, 0x1a, 2, 1, 0, 3, 3),
    (SHL, 0x1b, 2, 1, 0, 3, 3),
    (SHR, 0x1c, 2, 1, 0, 3, 3),
    (SAR, 0x1d, 2, 1, 0, 3, 3),
    (KECCAK256, 0x20, 2, 1, 0, 30, 30 + 6 * MAX_COPY_WORDS),
    (ADDRESS, 0x30, 0, 1, 0, 2, 2),
    (BALANCE, 0x31, 1, 1, 0, 100, 2600),
    (ORIGIN, 0x32, 0, 1, 0, 2, 2),
    (CALLER, 0x33, 0, 1, 0, 2, 2),
    (CALLVALUE, 0x34, 0, 1, 0, 2, 2),
    (CALLDATALOAD, 0x35, 1, 1, 0, 3, 3),
    (CALLDATASIZE, 0x36, 0, 1, 0, 2, 2),
    (CALLDATACOPY, 0x37, 3, 0, 0, 3, 3 + 3 * MAX_COPY_WORDS),
    (CODESIZE, 0x38, 0, 1, 0, 2, 2),
    (CODECOPY, 0x39, 3, 0, 0, 3, 3 + 3 * MAX_COPY_WORDS),
    (GASPRICE, 0x3a, 0, 1, 0, 2, 2),
    (EXTCODESIZE, 0x3b, 1, 1, 0, 100, 2600),
    (EXTCODECOPY, 0x3c, 4, 0, 0, 100, 2600 + 3 * MAX_COPY_WORDS),
    (RETURNDATASIZE, 0x3d, 0, 1, 0, 2, 2),
    (RETURNDATACOPY, 0x3e, 3, 0, 0, 3, 3 + 3 * MAX_COPY_WORDS),
    (EXTCODEHASH, 0x3f, 1, 1, 0, 100, 2600),
    (BLOCKHASH, 0x40, 1, 1, 0, 20, 20),
    (COINBASE, 0x41, 0, 1, 0, 2, 2),
    (TIMESTAMP, 0x42, 0, 1, 0, 2, 2),
    (NUMBER, 0x43, 0, 1, 0, 2, 2),
    (PREVRANDAO, 0x44, 0, 1, 0, 2, 2),
    (GASLIMIT, 0x45, 0, 1, 0, 2, 2),
    (CHAINID, 0x46, 0, 1, 0, 2, 2),
    (SELFBALANCE, 0x47, 0, 1, 0, 5, 5),
    (BASEFEE, 0x48, 0, 1, 0, 2, 2),
    (BLOBHASH, 0x49, 1, 1, 0, 3, 3),
    (BLOBBASEFEE, 0x4a, 0, 1, 0, 2, 2),
    (POP, 0x50, 1, 0, 0, 2, 2),
    (MLOAD, 0x51, 1, 1, 0, 3, 3 + 3),
    (MSTORE, 0x52, 2, 0, 0, 3, 3 + 3),
    (MSTORE8, 0x53, 2, 0, 0, 3, 3 + 3),
    (SLOAD, 0x54, 1, 1, 0, 100, 2100),
    (SSTORE, 0x55, 2, 0, 0, 100, 22100),
    (JUMP, 0x56, 1, 0, 0, 8, 8),
    (JUMPI, 0x57, 2, 0, 0, 10, 10),
    (PC, 0x58, 0, 1, 0, 2, 2),
    (MSIZE, 0x59, 0, 1, 0, 2, 2),
    (GAS, 0x5a, 0, 1, 0, 2, 2),
    (JUMPDEST, 0x5b, 0, 0, 0, 1, 1),
    (TLOAD, 0x5c, 1, 1, 0, 100, 100),
    (TSTORE, 0x5d, 2, 0, 0, 100, 100),
    (MCOPY, 0x5e, 3, 0, 0, 3, 3 + 3 * MAX_COPY_WORDS),
    (PUSH0, 0x5f, 0, 1, 0, 2, 2),
    (PUSH1, 0x60, 0, 1, 1, 3, 3),
    (PUSH2, 0x61, 0, 1, 2, 3, 3),
    (PUSH3, 0x62, 0, 1, 3, 3, 3),
    (PUSH4, 0x63, 0, 1, 4, 3, 3),
    (PUSH5, 0x64, 0, 1, 5, 3, 3),
    (PUSH6, 0x65, 0, 1, 6, 3, 3),
    (PUSH7, 0x66, 0, 1, 7, 3, 3),
    (PUSH8, 0x67, 0, 1, 8, 3, 3),
    (PUSH9, 0x68, 0, 1, 9, 3, 3),
    (PUSH10, 0x69, 0, 1, 10, 3, 3),
    (PUSH11, 0x6a, 0, 1, 11, 3, 3),
    (PUSH12, 0x6b, 0, 1, 12, 3, 3),
    (PUSH13, 0x6c, 0, 1, 13, 3, 3),
    (PUSH14, 0x6d, 0, 1, 14, 3, 3),
    (PUSH15, 0x6e, 0, 1, 15, 3, 3),
    (PUSH16, 0x6f, 0, 1, 16, 3, 3),
    (PUSH17, 0x70, 0, 1, 17, 3, 3),
    (PUSH18, 0x71, 0, 1, 18, 3, 3),
    (PUSH19, 0x72, 0, 1, 19, 3, 3),
    (PUSH20, 0x73, 0, 1, 20, 3, 3),
    (PUSH21, 0x74, 0, 1, 21, 3, 3),
    (PUSH22, 0x75, 0, 1, 22, 3, 3),
    (PUSH23, 0x76, 0, 1, 23, 3, 3),
    (PUSH24, 0x77, 0, 1, 24, 3, 3),
    (PUSH25, 0x78, 0, 1, 25, 3, 3),
    (PUSH26, 0x79, 0, 1, 26, 3, 3),
    (PUSH27, 0x7a, 0, 1, 27, 3, 3),
    (PUSH28, 0x7b, 0, 1, 28, 3, 3),
    (PUSH29, 0x7c, 0, 1, 29, 3, 3),
    (PUSH30, 0x7d, 0, 1, 30, 3, 3),
    (PUSH31, 0x7e, 0, 1, 31, 3, 3),
    (PUSH32, 0x7f, 0, 1, 32, 3, 3),
    (DUP1, 0x80, 1, 2, 0, 3, 3),
    (DUP2, 0x81, 2, 3, 0, 3, 3),
    (DUP3, 0x82, 3, 4, 0, 3, 3),
    (DUP4, 0x83, 4, 5, 0, 3, 3),
    (DUP5, 0x84, 5, 6, 0, 3, 3),
    (DUP6, 0x85, 6, 7, 0, 3, 3),
    (DUP7, 0x86, 7, 8, 0, 3, 3),
    (DUP8, 0x87, 8, 9, 0, 3, 3),
    (DUP9, 0x88, 9, 10, 0, 3, 3),
    (DUP10, 0x89, 10, 11, 0, 3, 3),
    (DUP11, 0x8a, 11, 12, 0, 3, 3),
    (DUP12, 0x8b, 12, 13, 0, 3, 3),
    (DUP13, 0x8c, 13, 14, 0, 3, 3),
    (DUP14, 0x8d, 14, 15, 0, 3, 3),
    (DUP15, 0x8e, 15, 16, 0, 3, 3),
    (DUP16, 0x8f, 16, 17, 0, 3, 3),
    (SWAP1, 0x90, 2, 2, 0, 3, 3),
    (SWAP2, 0x91, 3, 3, 0, 3, 3),
    (SWAP3, 0x92, 4, 4, 0, 3, 3),
    (SWAP4, 0x93, 5, 5, 0, 3, 3),
    (SWAP5, 0x94, 6, 6, 0, 3, 3),
    (SWAP6, 0x95, 7, 7, 0, 3, 3),
    (SWAP7, 0x96, 8, 8, 0, 3, 3),
    (SWAP8, 0x97, 9, 9, 0, 3, 3),
    (SWAP9, 0x98, 10, 10, 0, 3, 3),
    (SWAP10, 0x99, 11, 11, 0, 3, 3),
    (SWAP11, 0x9a, 12, 12, 0, 3, 3),
    (SWAP12, 0x9b, 13, 13, 0, 3, 3),
    (SWAP13, 0x9c, 14, 14, 0, 3, 3),
    (SWAP14, 0x9d, 15, 15, 0, 3, 3),
    (SWAP15, 0x9e, 16, 16, 0, 3, 3),
    (SWAP16, 0x9f, 17, 17, 0, 3, 3),
    (LOG0, 0xa0, 2, 0, 0, 375, 375 + 8 * 32),
    (LOG1, 0xa1, 3, 0, 0, 750, 750 + 8 * 32),
    (LOG2, 0xa2, 4, 0, 0, 1125, 1125 + 8 * 32),
    (LOG3, 0xa3, 5, 0, 0, 1500, 1500 + 8 * 32),
    (LOG4, 0xa4, 6, 0, 0, 1875, 1875 + 8 * 32),
    (CREATE, 0xf0, 3, 1, 0, 32000, 32000),
    (CALL, 0xf1, 7, 1, 0, 100, 2600 + 9000 + 25000),
    (CALLCODE, 0xf2, 7, 1, 0, 100, 2600 + 9000),
    (RETURN, 0xf3, 2, 0, 0, 0, 0),
    (DELEGATECALL, 0xf4, 6, 1, 0, 100, 2600),
    (CREATE2, 0xf5, 4, 1, 0, 32000, 32000 + 6 * MAX_COPY_WORDS),
    (STATICCALL, 0xfa, 6, 1, 0, 100, 2600),
    (REVERT, 0xfd, 2, 0, 0, 0, 0),
    (INVALID, 0xfe, 0, 0, 0, 0, 0),
    (SELFDESTRUCT, 0xff, 1, 0, 0, 5000, 30000),
}

lazy_static! {
    static ref OPCODE_TABLE: [Option<OpInfo>; 256] = build_table();
}

impl Opcode {
    /// Metadata for this opcode, or `None` for unassigned bytes.
    pub fn info(&self) -> Option<&'static OpInfo> {
        OPCODE_TABLE[self.0 as usize].as_ref()
    }

    /// Mnemonic, or `"UNKNOWN"` for unassigned bytes.
    pub fn name(&self) -> &'static str {
        self.info().map(|i| i.name).unwrap_or("UNKNOWN")
    }

    pub fn is_push(&self) -> bool {
        (Opcode::PUSH1.0..=Opcode::PUSH32.0).contains(&self.0)
    }

    /// Immediate bytes following this opcode in the instruction stream.
    pub fn immediate_len(&self) -> usize {
        self.info().map(|i| i.immediates as usize).unwrap_or(0)
    }

    pub fn is_dup(&self) -> bool {
        (Opcode::DUP1.0..=Opcode::DUP16.0).contains(&self.0)
    }

    pub fn is_swap(&self) -> bool {
        (Opcode::SWAP1.0..=Opcode::SWAP16.0).contains(&self.0)
    }

    pub fn is_log(&self) -> bool {
        (Opcode::LOG0.0..=Opcode::LOG4.0).contains(&self.0)
    }

    /// Whether this opcode ends a basic block (jump, halt, call or create).
    pub fn is_block_end(&self) -> bool {
        matches!(
            *self,
            Opcode::JUMP
                | Opcode::JUMPI
                | Opcode::STOP
                | Opcode::RETURN
                | Opcode::REVERT
                | Opcode::INVALID
                | Opcode::SELFDESTRUCT
                | Opcode::CREATE
                | Opcode::CREATE2
                | Opcode::CALL
                | Opcode::CALLCODE
                | Opcode::DELEGATECALL
                | Opcode::STATICCALL
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup() {
        assert_eq!(Opcode::ADD.name(), "ADD");
        assert_eq!(Opcode::ADD.info().unwrap().inputs, 2);
        assert_eq!(Opcode::PUSH4.immediate_len(), 4);
        assert!(Opcode(0x0c).info().is_none());
        assert_eq!(Opcode(0x0c).name(), "UNKNOWN");
    }

    #[test]
    fn gas_envelope_is_an_interval() {
        for entry in (0u16..=255).filter_map(|b| Opcode(b as u8).info()) {
            assert!(entry.gas_min <= entry.gas_max, "{}", entry.name);
        }
    }
}
