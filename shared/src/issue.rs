// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Severity attached to an issue by its detection module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => f.write_str("Low"),
            Severity::Medium => f.write_str("Medium"),
            Severity::High => f.write_str("High"),
        }
    }
}

/// One concretised transaction in a witness sequence: replaying these in
/// order against the analysed bytecode reaches the flagged instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessTransaction {
    pub caller: Address,
    pub callee: Address,
    #[serde(with = "crate::abi::biguint_hex")]
    pub call_value: BigUint,
    pub calldata: Vec<u8>,
}

/// A vulnerability finding. Immutable once emitted; issues are data, never
/// control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub contract: String,
    pub function: String,
    /// Byte address of the flagged instruction.
    pub address: usize,
    pub swc_id: String,
    pub severity: Severity,
    pub title: String,
    pub description_head: String,
    pub description_tail: String,
    /// `(min, max)` gas consumed on the path that reached the instruction.
    pub gas_used: (u64, u64),
    pub transaction_sequence: Vec<WitnessTransaction>,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) at {}:{} pc={}",
            self.swc_id, self.title, self.severity, self.contract, self.function, self.address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_serialize_for_downstream_renderers() {
        let issue = Issue {
            contract: "Token".to_string(),
            function: "fallback".to_string(),
            address: 17,
            swc_id: "SWC-104".to_string(),
            severity: Severity::Medium,
            title: "Unchecked return value from external call.".to_string(),
            description_head: "The return value of a message call is not checked.".to_string(),
            description_tail: String::new(),
            gas_used: (100, 2600),
            transaction_sequence: vec![WitnessTransaction {
                caller: Address::from(0xdead),
                callee: Address::from(0xbeef),
                call_value: BigUint::parse_bytes(b"de0b6b3a7640000", 16).unwrap(),
                calldata: vec![0xa9, 0x05, 0x9c, 0xbb],
            }],
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"SWC-104\""));
        assert!(json.contains("\"0xde0b6b3a7640000\""));
        let back: Issue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, issue);
    }
}
