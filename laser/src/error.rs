// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt::Display;

/// Execution result.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Errors raised while advancing a path. Everything except [`Fatal`] is
/// terminal for the *path* only: the scheduler drops the offending state and
/// carries on. [`Fatal`] aborts the whole run.
///
/// [`Fatal`]: ExecutionError::Fatal
#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid jump target: {0}")]
    InvalidJump(String),
    #[error("out of gas")]
    OutOfGas,
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("state modification inside a static call")]
    WriteProtection,
    #[error("unsatisfiable path constraints")]
    Unsat,
    #[error("native contract error: {0}")]
    NativeContract(String),
    #[error("fatal error: {0:?}")]
    Fatal(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Whether this error must abort the run rather than drop the path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Fatal(_))
    }
}

/// Classifies foreign errors as fatal engine errors.
pub trait ClassifyResult<T, E> {
    fn or_fatal(self) -> Result<T>;
}

impl<T, E> ClassifyResult<T, E> for std::result::Result<T, E>
where
    E: Display,
{
    fn or_fatal(self) -> Result<T> {
        self.map_err(|e| ExecutionError::Fatal(anyhow::anyhow!("{}", e)))
    }
}
