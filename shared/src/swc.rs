// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Smart Contract Weakness Classification identifiers forwarded on issues.
//! The engine attaches these verbatim; it assigns no meaning to them.

pub const UNCHECKED_RET_VAL: &str = "SWC-104";
pub const ASSERT_VIOLATION: &str = "SWC-110";
