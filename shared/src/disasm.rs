// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Disassembly records: the engine's input format. A [`Disassembly`] is an
//! indexed instruction list with enumerable jump destinations; it is normally
//! produced by an external disassembler, but a raw-bytecode decoder is
//! provided so embedders and tests can build one directly.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::opcode::Opcode;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Byte offset of the opcode in the code.
    pub address: usize,
    pub opcode: Opcode,
    /// Immediate bytes (PUSH argument), if any.
    pub argument: Option<Vec<u8>>,
}

/// A contract's code: raw bytes plus the decoded instruction list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disassembly {
    pub bytecode: Vec<u8>,
    pub instructions: Vec<Instruction>,
    /// Byte addresses of every JUMPDEST.
    pub jump_destinations: BTreeSet<usize>,
    #[serde(skip)]
    address_index: HashMap<usize, usize>,
}

impl Disassembly {
    /// Decodes raw bytecode into an instruction list. Truncated PUSH
    /// immediates at the end of the code are zero-extended, matching how the
    /// EVM pads reads past the end of code.
    pub fn from_bytecode(code: &[u8]) -> Self {
        let mut instructions = Vec::new();
        let mut jump_destinations = BTreeSet::new();
        let mut pc = 0usize;
        while pc < code.len() {
            let opcode = Opcode(code[pc]);
            if opcode == Opcode::JUMPDEST {
                jump_destinations.insert(pc);
            }
            let imm = opcode.immediate_len();
            let argument = if imm > 0 {
                let mut arg = vec![0u8; imm];
                let available = imm.min(code.len() - pc - 1);
                arg[..available].copy_from_slice(&code[pc + 1..pc + 1 + available]);
                Some(arg)
            } else {
                None
            };
            instructions.push(Instruction {
                address: pc,
                opcode,
                argument,
            });
            pc += 1 + imm;
        }
        let mut disasm = Disassembly {
            bytecode: code.to_vec(),
            instructions,
            jump_destinations,
            address_index: HashMap::new(),
        };
        disasm.reindex();
        disasm
    }

    /// Parses `0x`-prefixed or bare hex into a disassembly.
    pub fn from_hex(code: &str) -> Result<Self, hex::FromHexError> {
        let code = code.strip_prefix("0x").unwrap_or(code);
        Ok(Self::from_bytecode(&hex::decode(code)?))
    }

    /// Rebuilds the byte-address → instruction-index map. Must be called if
    /// the instruction list is constructed or modified by hand.
    pub fn reindex(&mut self) {
        self.address_index = self
            .instructions
            .iter()
            .enumerate()
            .map(|(i, ins)| (ins.address, i))
            .collect();
    }

    /// The instruction-list index of the instruction at byte address `addr`.
    pub fn index_of_address(&self, addr: usize) -> Option<usize> {
        self.address_index.get(&addr).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Whether `addr` is a valid JUMP target.
    pub fn is_jump_destination(&self, addr: usize) -> bool {
        self.jump_destinations.contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
