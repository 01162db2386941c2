// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The execution-state data model: accounts and their storage, the world
//! state shared along a path, per-frame machine state, and the global state
//! aggregating them. Everything here clones deeply enough that forked paths
//! share no mutable structure.

pub mod account;
pub mod annotation;
pub mod calldata;
pub mod environment;
pub mod global_state;
pub mod machine_state;
pub mod memory;
pub mod transient;
pub mod world_state;

pub use account::{Account, Storage};
pub use annotation::StateAnnotation;
pub use calldata::Calldata;
pub use environment::Environment;
pub use global_state::{Frame, GlobalState, ReturnContext};
pub use machine_state::MachineState;
pub use memory::Memory;
pub use transient::TransientStorage;
pub use world_state::{BlockContext, WorldState};
