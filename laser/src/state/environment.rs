// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::rc::Rc;

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;

use crate::smt::Term;
use crate::state::calldata::Calldata;

/// The execution environment of one call frame: whose code runs, who called
/// it, and with what input.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The account whose storage the frame operates on.
    pub active_account: Address,
    /// Name of the function believed to be executing, for CFG labels and
    /// issues. `"fallback"`/`"constructor"` unless an ABI mapping is known.
    pub active_function_name: String,
    /// The code being executed. With DELEGATECALL/CALLCODE this differs from
    /// `active_account`'s own code.
    pub code: Rc<Disassembly>,
    pub caller: Term,
    pub origin: Term,
    pub callvalue: Term,
    pub gasprice: Term,
    pub calldata: Calldata,
    /// Set inside STATICCALL; state writes become path-terminal errors.
    pub static_call: bool,
}

impl Environment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        active_account: Address,
        code: Rc<Disassembly>,
        caller: Term,
        origin: Term,
        callvalue: Term,
        gasprice: Term,
        calldata: Calldata,
    ) -> Self {
        Environment {
            active_account,
            active_function_name: "fallback".to_string(),
            code,
            caller,
            origin,
            callvalue,
            gasprice,
            calldata,
            static_call: false,
        }
    }
}
