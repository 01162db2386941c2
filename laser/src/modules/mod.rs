// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The detection-module hook bus. Modules declare which opcodes they want to
//! observe, before and/or after execution; the registry compiles those
//! declarations into opcode-indexed dispatch maps so the interpreter loop
//! never scans the module list. Issues are collected per run and
//! de-duplicated by (SWC id, instruction address).

use std::collections::{HashMap, HashSet};

use laser_shared::issue::Issue;
use laser_shared::opcode::Opcode;

use crate::instructions::ExecCtx;
use crate::state::GlobalState;

pub mod exceptions;
pub mod unchecked_retval;

/// When a module runs: `Callback` modules observe the interpreter
/// synchronously through opcode hooks; `Post` modules run once over the
/// final state space. Post modules are markedly slower and discouraged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Callback,
    Post,
}

/// The hook being delivered: the opcode it fired on and that instruction's
/// byte address.
#[derive(Debug, Clone, Copy)]
pub enum Hook {
    /// Before the instruction executes; the state is the one about to
    /// execute it.
    Pre { opcode: Opcode, address: usize },
    /// After the instruction executed; the state is one of its successors.
    Post { opcode: Opcode, address: usize },
}

/// A vulnerability detector. Implementations keep per-path scratch state in
/// [`StateAnnotation`](crate::state::StateAnnotation)s, never in `self`, so
/// forked paths observe only their own history.
pub trait DetectionModule {
    fn name(&self) -> &'static str;

    fn swc_id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn entry_point(&self) -> EntryPoint {
        EntryPoint::Callback
    }

    fn pre_hooks(&self) -> &'static [Opcode] {
        &[]
    }

    fn post_hooks(&self) -> &'static [Opcode] {
        &[]
    }

    /// Callback delivery. The module may annotate the state and may emit
    /// issues.
    fn on_hook(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        hook: Hook,
        state: &mut GlobalState,
    ) -> Vec<Issue>;

    /// One pass over the final states, for `Post` modules.
    fn post_analysis(
        &mut self,
        _ctx: &mut ExecCtx<'_>,
        _final_states: &mut [GlobalState],
    ) -> Vec<Issue> {
        Vec::new()
    }
}

/// The registry: owns the modules, the compiled hook maps and the issue
/// collection for the current run.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn DetectionModule>>,
    pre: HashMap<u8, Vec<usize>>,
    post: HashMap<u8, Vec<usize>>,
    issues: Vec<Issue>,
    seen: HashSet<(String, usize)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn DetectionModule>) {
        log::debug!("loaded detection module: {}", module.name());
        self.modules.push(module);
        self.rebuild_hooks();
    }

    /// Recompiles the opcode → module maps. Called whenever the module set
    /// changes.
    fn rebuild_hooks(&mut self) {
        self.pre.clear();
        self.post.clear();
        for (index, module) in self.modules.iter().enumerate() {
            for op in module.pre_hooks() {
                self.pre.entry(op.0).or_default().push(index);
            }
            for op in module.post_hooks() {
                self.post.entry(op.0).or_default().push(index);
            }
        }
    }

    pub fn fire_pre(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        opcode: Opcode,
        address: usize,
        state: &mut GlobalState,
    ) {
        let targets = match self.pre.get(&opcode.0) {
            Some(t) => t.clone(),
            None => return,
        };
        for index in targets {
            let issues = self.modules[index].on_hook(ctx, Hook::Pre { opcode, address }, state);
            self.collect(issues);
        }
    }

    pub fn fire_post(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        opcode: Opcode,
        address: usize,
        state: &mut GlobalState,
    ) {
        let targets = match self.post.get(&opcode.0) {
            Some(t) => t.clone(),
            None => return,
        };
        for index in targets {
            let issues = self.modules[index].on_hook(ctx, Hook::Post { opcode, address }, state);
            self.collect(issues);
        }
    }

    /// Runs every `Post`-entry-point module over the final state space.
    pub fn run_post_analysis(&mut self, ctx: &mut ExecCtx<'_>, final_states: &mut [GlobalState]) {
        for module in &mut self.modules {
            if module.entry_point() == EntryPoint::Post {
                log::debug!("entering post analysis module: {}", module.name());
                let issues = module.post_analysis(ctx, final_states);
                for issue in issues {
                    Self::collect_one(&mut self.seen, &mut self.issues, issue);
                }
            }
        }
    }

    fn collect(&mut self, issues: Vec<Issue>) {
        for issue in issues {
            Self::collect_one(&mut self.seen, &mut self.issues, issue);
        }
    }

    fn collect_one(
        seen: &mut HashSet<(String, usize)>,
        issues: &mut Vec<Issue>,
        issue: Issue,
    ) -> bool {
        let key = (issue.swc_id.clone(), issue.address);
        if !seen.insert(key) {
            return false;
        }
        log::info!("issue found: {}", issue);
        issues.push(issue);
        true
    }

    /// Drains the issues collected so far.
    pub fn take_issues(&mut self) -> Vec<Issue> {
        std::mem::take(&mut self.issues)
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}
