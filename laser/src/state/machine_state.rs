// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use laser_shared::STACK_LIMIT;

use crate::error::{ExecutionError, Result};
use crate::gas::GasTracker;
use crate::smt::Term;
use crate::state::memory::Memory;

/// Per-frame machine state: operand stack, memory, program counter (an index
/// into the frame's instruction list), call depth and the gas envelope.
/// Stack faults and invalid jumps are terminal for the path, not the run.
#[derive(Debug, Clone)]
pub struct MachineState {
    stack: Vec<Term>,
    pub memory: Memory,
    pub pc: usize,
    /// Call depth of this frame (0 for the transaction entry frame).
    pub depth: usize,
    pub gas: GasTracker,
    /// Return buffer of the most recent completed sub-call, as 8-bit terms.
    pub last_return_data: Option<Vec<Term>>,
}

impl MachineState {
    pub fn new(depth: usize, gas_limit: u64) -> Self {
        MachineState {
            stack: Vec::new(),
            memory: Memory::new(),
            pc: 0,
            depth,
            gas: GasTracker::new(gas_limit),
            last_return_data: None,
        }
    }

    pub fn push(&mut self, value: Term) -> Result<()> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(ExecutionError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Term> {
        self.stack.pop().ok_or(ExecutionError::StackUnderflow)
    }

    /// Pops `n` values; the first element of the result was the top of the
    /// stack.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Term>> {
        if self.stack.len() < n {
            return Err(ExecutionError::StackUnderflow);
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.stack.pop().expect("length checked"));
        }
        Ok(out)
    }

    /// The `i`-th value from the top (0 = top) without removing it.
    pub fn peek(&self, i: usize) -> Result<&Term> {
        if i >= self.stack.len() {
            return Err(ExecutionError::StackUnderflow);
        }
        Ok(&self.stack[self.stack.len() - 1 - i])
    }

    /// DUPi: copies the `i`-th value from the top (1-based) onto the top.
    pub fn dup(&mut self, i: usize) -> Result<()> {
        let value = self.peek(i - 1)?.clone();
        self.push(value)
    }

    /// SWAPi: exchanges the top with the `i`-th value below it (1-based).
    pub fn swap(&mut self, i: usize) -> Result<()> {
        if i >= self.stack.len() {
            return Err(ExecutionError::StackUnderflow);
        }
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - i);
        Ok(())
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[Term] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::bv;

    fn mstate() -> MachineState {
        MachineState::new(0, 1_000_000)
    }

    #[test]
    fn push_pop_peek() {
        let mut m = mstate();
        m.push(bv(1, 256)).unwrap();
        m.push(bv(2, 256)).unwrap();
        assert_eq!(m.peek(0).unwrap(), &bv(2, 256));
        assert_eq!(m.peek(1).unwrap(), &bv(1, 256));
        assert_eq!(m.pop().unwrap(), bv(2, 256));
        assert!(matches!(m.peek(5), Err(ExecutionError::StackUnderflow)));
    }

    #[test]
    fn dup_and_swap() {
        let mut m = mstate();
        m.push(bv(1, 256)).unwrap();
        m.push(bv(2, 256)).unwrap();
        m.dup(2).unwrap();
        assert_eq!(m.peek(0).unwrap(), &bv(1, 256));
        m.swap(2).unwrap();
        assert_eq!(m.peek(0).unwrap(), &bv(1, 256));
        assert_eq!(m.peek(2).unwrap(), &bv(1, 256));
    }

    #[test]
    fn overflow_is_an_error() {
        let mut m = mstate();
        for i in 0..STACK_LIMIT {
            m.push(bv(i as u64, 256)).unwrap();
        }
        assert!(matches!(
            m.push(bv(0, 256)),
            Err(ExecutionError::StackOverflow)
        ));
    }

    #[test]
    fn pop_n_orders_top_first() {
        let mut m = mstate();
        m.push(bv(1, 256)).unwrap();
        m.push(bv(2, 256)).unwrap();
        m.push(bv(3, 256)).unwrap();
        let popped = m.pop_n(2).unwrap();
        assert_eq!(popped, vec![bv(3, 256), bv(2, 256)]);
        assert_eq!(m.stack_len(), 1);
    }
}
