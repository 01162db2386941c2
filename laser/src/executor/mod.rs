// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The top-level driver: builds transactions, owns the worklist, advances
//! one global state at a time through the instruction handlers, routes
//! detector hooks, and maintains the CFG. Single-threaded and cooperative;
//! the only blocking operation anywhere below is the synchronous solver
//! query.

pub mod transaction;

use std::rc::Rc;
use std::time::{Duration, Instant};

use laser_shared::address::Address;
use laser_shared::disasm::Disassembly;
use laser_shared::issue::Issue;

use crate::cfg::{Cfg, JumpType, NodeFlags};
use crate::error::Result;
use crate::gas::GasCharge;
use crate::instructions::{self, Counters, ExecCtx, Successor, Transition};
use crate::machine::AnalysisConfig;
use crate::modules::{DetectionModule, ModuleRegistry};
use crate::smt::solver::{SolverBackend, SolverStatistics};
use crate::smt::{bv, bv_sym, Solver};
use crate::state::{Calldata, Environment, Frame, GlobalState, MachineState, WorldState};
use crate::strategy;

use self::transaction::{TransactionRecord, TxKind};

/// Address the analysed contract is deployed at.
pub const CONTRACT_ADDRESS: &str = "0x0901d12ebe1b195e5aa8748e62bd7734ae19b51f";

/// Everything a run produces: findings, the explored graph, and warnings
/// about places where precision was given up.
pub struct AnalysisResult {
    pub issues: Vec<Issue>,
    pub cfg: Cfg,
    pub warnings: Vec<String>,
    pub solver_stats: SolverStatistics,
}

/// One complete top-level transaction, ready to leave the executor.
struct CompletedTransaction {
    world: WorldState,
    reverted: bool,
    return_data: Option<Vec<u8>>,
    last_node: usize,
}

pub struct LaserExecutor {
    config: AnalysisConfig,
    solver: Solver,
    counters: Counters,
    registry: ModuleRegistry,
    cfg: Cfg,
    warnings: Vec<String>,
    final_states: Vec<GlobalState>,
    tx_counter: usize,
}

impl LaserExecutor {
    pub fn new(config: AnalysisConfig, backend: Box<dyn SolverBackend>) -> Self {
        let solver = Solver::new(backend, config.solver_config());
        LaserExecutor {
            config,
            solver,
            counters: Counters::default(),
            registry: ModuleRegistry::new(),
            cfg: Cfg::new(),
            warnings: Vec::new(),
            final_states: Vec::new(),
            tx_counter: 0,
        }
    }

    pub fn register_module(&mut self, module: Box<dyn DetectionModule>) {
        self.registry.register(module);
    }

    /// Analyses already-deployed runtime code: no creation transaction,
    /// `transaction_count` rounds of symbolic message calls.
    pub fn analyze_runtime(
        &mut self,
        runtime_code: &[u8],
        contract_name: &str,
    ) -> Result<AnalysisResult> {
        let address: Address = CONTRACT_ADDRESS.parse().expect("well-formed constant");
        let mut world = WorldState::new();
        world.create_account(
            address,
            contract_name,
            Rc::new(Disassembly::from_bytecode(runtime_code)),
            bv_sym("contract_balance", 256),
            self.config.concrete_storage_default,
        );
        let deadline = Instant::now() + self.config.execution_timeout();
        self.run_message_rounds(vec![(world, None)], deadline)?;
        Ok(self.finish())
    }

    /// The full pipeline: a contract-creation transaction first (the
    /// returned bytes become the runtime code), then the message rounds.
    pub fn analyze_creation(
        &mut self,
        creation_code: &[u8],
        contract_name: &str,
    ) -> Result<AnalysisResult> {
        let deadline = Instant::now() + self.config.execution_timeout();
        let create_deadline =
            Instant::now() + Duration::from_millis(self.config.create_timeout_ms);

        let address: Address = CONTRACT_ADDRESS.parse().expect("well-formed constant");
        let mut world = WorldState::new();
        world.create_account(
            address,
            contract_name,
            Rc::new(Disassembly::default()),
            bv(0, 256),
            true,
        );

        let entry = self.creation_state(world, address, creation_code);
        let completed = self.execute_transaction(entry, create_deadline.min(deadline))?;

        let mut open = Vec::new();
        for tx in completed {
            if tx.reverted {
                log::debug!("constructor reverted; discarding world");
                continue;
            }
            let mut world = tx.world;
            match tx.return_data {
                Some(runtime) if !runtime.is_empty() => {
                    let account = world
                        .account_mut(&address)
                        .expect("the created account exists");
                    account.code = Rc::new(Disassembly::from_bytecode(&runtime));
                    open.push((world, Some(tx.last_node)));
                }
                _ => {
                    self.warn("constructor produced no concrete runtime code");
                }
            }
        }
        self.run_message_rounds(open, deadline)?;
        Ok(self.finish())
    }

    fn finish(&mut self) -> AnalysisResult {
        let mut ctx = ExecCtx {
            solver: &mut self.solver,
            config: &self.config,
            counters: &mut self.counters,
            warnings: &mut self.warnings,
        };
        let mut final_states = std::mem::take(&mut self.final_states);
        self.registry.run_post_analysis(&mut ctx, &mut final_states);

        AnalysisResult {
            issues: self.registry.take_issues(),
            cfg: std::mem::take(&mut self.cfg),
            warnings: std::mem::take(&mut self.warnings),
            solver_stats: self.solver.stats,
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Executes up to `transaction_count` rounds of symbolic message calls,
    /// feeding each round's surviving worlds into the next.
    fn run_message_rounds(
        &mut self,
        mut open: Vec<(WorldState, Option<usize>)>,
        deadline: Instant,
    ) -> Result<()> {
        for round in 0..self.config.transaction_count {
            if open.is_empty() {
                break;
            }
            log::debug!("starting message-call round {}", round + 1);
            let mut next_open = Vec::new();
            for (world, prev_node) in open {
                let entry = self.message_call_state(world, prev_node);
                for tx in self.execute_transaction(entry, deadline)? {
                    if !tx.reverted {
                        next_open.push((tx.world, Some(tx.last_node)));
                    }
                }
            }
            open = next_open;
        }
        Ok(())
    }

    /// Builds the constructor-execution state.
    fn creation_state(
        &mut self,
        mut world: WorldState,
        address: Address,
        creation_code: &[u8],
    ) -> GlobalState {
        self.tx_counter += 1;
        let id = self.tx_counter.to_string();
        let caller = bv_sym(&format!("{}_caller", id), 256);
        let callvalue = bv_sym(&format!("{}_callvalue", id), 256);
        // Constructor arguments travel appended to the creation code; the
        // engine analyses argumentless constructors symbolically.
        let calldata = Calldata::concrete(Vec::new());
        world.transaction_sequence.push(TransactionRecord {
            id,
            kind: TxKind::ContractCreation,
            caller: caller.clone(),
            callee: address,
            call_value: callvalue.clone(),
            calldata: calldata.clone(),
        });

        let code = Rc::new(Disassembly::from_bytecode(creation_code));
        let mut env = Environment::new(
            address,
            code,
            caller.clone(),
            caller,
            callvalue,
            bv_sym("gas_price", 256),
            calldata,
        );
        env.active_function_name = "constructor".to_string();

        let mut state = GlobalState::new(
            world,
            Frame {
                env,
                mstate: MachineState::new(0, self.config.tx_gas_limit),
                return_ctx: None,
            },
        );
        state.node_id = self.entry_node(&state, None);
        state
    }

    /// Builds a fresh symbolic message-call state against `world`'s deployed
    /// contract. Transient storage is cleared here: this is the top-level
    /// transaction boundary.
    fn message_call_state(
        &mut self,
        mut world: WorldState,
        prev_node: Option<usize>,
    ) -> GlobalState {
        self.tx_counter += 1;
        let id = self.tx_counter.to_string();
        let address: Address = CONTRACT_ADDRESS.parse().expect("well-formed constant");

        world.transient_storage.clear();
        world.sweep_deleted();

        let caller = bv_sym(&format!("{}_caller", id), 256);
        let callvalue = bv_sym(&format!("{}_callvalue", id), 256);
        let calldata = Calldata::symbolic(id.clone());
        world.transaction_sequence.push(TransactionRecord {
            id,
            kind: TxKind::MessageCall,
            caller: caller.clone(),
            callee: address,
            call_value: callvalue.clone(),
            calldata: calldata.clone(),
        });

        let code = world
            .account(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default();
        let env = Environment::new(
            address,
            code,
            caller.clone(),
            caller,
            callvalue,
            bv_sym("gas_price", 256),
            calldata,
        );

        let mut state = GlobalState::new(
            world,
            Frame {
                env,
                mstate: MachineState::new(0, self.config.tx_gas_limit),
                return_ctx: None,
            },
        );
        state.node_id = self.entry_node(&state, prev_node);
        state
    }

    /// Opens the CFG node for a transaction entry and links it to the
    /// previous transaction's last node, if any.
    fn entry_node(&mut self, state: &GlobalState, prev_node: Option<usize>) -> usize {
        let node = self.cfg.node_for(
            &contract_name(state),
            &state.env().active_function_name,
            0,
            state.world_state.constraints.fingerprint(),
            NodeFlags {
                function_entry: true,
                call_return: false,
            },
        );
        if let Some(prev) = prev_node {
            self.cfg.add_edge(prev, node, JumpType::Transaction, None);
        }
        node
    }

    /// Drives one top-level transaction to completion across all its paths.
    fn execute_transaction(
        &mut self,
        entry: GlobalState,
        deadline: Instant,
    ) -> Result<Vec<CompletedTransaction>> {
        let mut worklist = strategy::build(self.config.strategy);
        worklist.append(entry);
        let mut completed = Vec::new();

        while let Some(state) = worklist.pick_next(&mut self.solver) {
            if Instant::now() >= deadline {
                self.warn(format!(
                    "execution timed out with {} states unexplored; results are partial",
                    worklist.len() + 1
                ));
                worklist.clear();
                break;
            }
            if state.instruction_count > self.config.max_depth {
                log::trace!("max depth reached, discarding state");
                continue;
            }

            let successors = match self.step(state) {
                Ok(successors) => successors,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::trace!("path ended: {}", err);
                    continue;
                }
            };

            for successor in successors {
                match successor.transition {
                    Transition::TransactionEnd { reverted } => {
                        completed.push(self.complete_transaction(successor.state, reverted));
                    }
                    _ => worklist.append(successor.state),
                }
            }
        }

        Ok(completed)
    }

    fn complete_transaction(&mut self, state: GlobalState, reverted: bool) -> CompletedTransaction {
        let return_data = state.mstate().last_return_data.as_ref().and_then(|terms| {
            terms
                .iter()
                .map(|t| t.as_u64().map(|v| v as u8))
                .collect::<Option<Vec<u8>>>()
        });
        let last_node = state.node_id;
        let world = state.world_state.clone();
        self.final_states.push(state);
        CompletedTransaction {
            world,
            reverted,
            return_data,
            last_node,
        }
    }

    /// One instruction: gas, CFG bookkeeping, pre-hooks, the semantic
    /// transformer, post-hooks.
    fn step(&mut self, mut state: GlobalState) -> Result<Vec<Successor>> {
        let (opcode, address, _) = instructions::current_op(&state);

        state.mstate_mut().gas.charge(GasCharge::for_opcode(opcode))?;
        self.cfg
            .record_visit(state.node_id, address, state.instruction_count);

        let mut ctx = ExecCtx {
            solver: &mut self.solver,
            config: &self.config,
            counters: &mut self.counters,
            warnings: &mut self.warnings,
        };
        self.registry.fire_pre(&mut ctx, opcode, address, &mut state);

        let handler = instructions::handler_for(opcode);
        let parent_node = state.node_id;
        let mut successors = handler(&mut ctx, state)?;

        for successor in &mut successors {
            successor.state.instruction_count += 1;
            self.track_transition(parent_node, successor);
            let mut ctx = ExecCtx {
                solver: &mut self.solver,
                config: &self.config,
                counters: &mut self.counters,
                warnings: &mut self.warnings,
            };
            self.registry
                .fire_post(&mut ctx, opcode, address, &mut successor.state);
        }

        Ok(successors)
    }

    /// Turns a successor's transition into CFG structure: a new node when
    /// control left the current block, and the edge that got it there.
    fn track_transition(&mut self, parent_node: usize, successor: &mut Successor) {
        let (jump_type, condition, flags) = match &successor.transition {
            Transition::Sequential => return,
            Transition::TransactionEnd { .. } => return,
            Transition::JumpTaken { condition } => (
                if condition.is_some() {
                    JumpType::Conditional
                } else {
                    JumpType::Unconditional
                },
                condition.clone(),
                NodeFlags::default(),
            ),
            Transition::FallThrough { condition } => (
                JumpType::Conditional,
                Some(condition.clone()),
                NodeFlags::default(),
            ),
            Transition::CallEnter => (
                JumpType::Call,
                None,
                NodeFlags {
                    function_entry: true,
                    call_return: false,
                },
            ),
            Transition::CallReturn => (
                JumpType::Return,
                None,
                NodeFlags {
                    function_entry: false,
                    call_return: true,
                },
            ),
        };

        let state = &mut successor.state;
        let start_addr = state
            .current_instruction()
            .map(|i| i.address)
            .unwrap_or(usize::MAX);
        let node = self.cfg.node_for(
            &contract_name(state),
            &state.env().active_function_name,
            start_addr,
            state.world_state.constraints.fingerprint(),
            flags,
        );
        self.cfg.add_edge(parent_node, node, jump_type, condition);
        state.node_id = node;
    }
}

fn contract_name(state: &GlobalState) -> String {
    state
        .world_state
        .account(&state.env().active_account)
        .map(|a| a.contract_name.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
