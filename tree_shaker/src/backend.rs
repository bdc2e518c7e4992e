//! The compilation backend seam.
//!
//! The shaker drives compilation but knows nothing about instruction
//! selection; it hands a function to a [`CompileBackend`] and gets back a
//! [`CompiledCode`] descriptor or a classified [`CompileError`]. The error
//! classification drives the shaker's retry policy: branch-range overflows
//! retry with far branches, speculative rollbacks retry a bounded number of
//! times before speculation is disabled, bailouts fall back to unoptimized
//! compilation.
//!
//! [`TableBackend`] is a scripted implementation used throughout the test
//! suite: each function compiles to a pre-planned code descriptor, optionally
//! after a planned sequence of failures.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::program::{
    CompiledCode, FunctionId, PoolEntry, Program, StaticCallEntry, TypeId,
};

/// Why a compilation attempt did not produce code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Unrecoverable; aborts the whole pass.
    #[error("compilation of {function:?} failed: {message}")]
    Fatal { function: FunctionId, message: String },
    /// The optimizing pipeline gave up; retry unoptimized.
    #[error("optimizing compiler bailed out on {function:?}")]
    Bailout { function: FunctionId },
    /// Generated code exceeded near-branch range; retry with far branches.
    #[error("branch range overflow compiling {function:?}")]
    BranchRangeOverflow { function: FunctionId },
    /// A speculative assumption was invalidated mid-compile; retry, and
    /// after bounded retries disable speculation.
    #[error("speculative assumption rolled back compiling {function:?}")]
    SpeculativeRollback { function: FunctionId },
}

/// Knobs for one compilation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileParams {
    pub optimized: bool,
    pub use_far_branches: bool,
    pub speculative_inlining: bool,
}

impl Default for CompileParams {
    fn default() -> Self {
        CompileParams {
            optimized: true,
            use_far_branches: false,
            speculative_inlining: true,
        }
    }
}

pub trait CompileBackend {
    fn compile(
        &mut self,
        program: &mut Program,
        function: FunctionId,
        params: &CompileParams,
    ) -> Result<CompiledCode, CompileError>;
}

/// A failure scripted to occur on one compilation attempt.
#[derive(Debug, Clone)]
pub enum PlannedFailure {
    Fatal(String),
    Bailout,
    BranchRangeOverflow,
    SpeculativeRollback,
}

/// What a function's compiled code should look like, plus any failures the
/// backend should report before finally succeeding.
#[derive(Debug, Clone, Default)]
pub struct CodePlan {
    pub static_calls: Vec<StaticCallEntry>,
    pub pool: Vec<PoolEntry>,
    pub inlined_functions: Vec<FunctionId>,
    pub handler_types: Vec<TypeId>,
    pub failures: VecDeque<PlannedFailure>,
}

impl CodePlan {
    pub fn with_static_calls(calls: Vec<StaticCallEntry>) -> Self {
        CodePlan {
            static_calls: calls,
            ..Default::default()
        }
    }

    pub fn with_pool(pool: Vec<PoolEntry>) -> Self {
        CodePlan {
            pool,
            ..Default::default()
        }
    }

    pub fn failing_first(mut self, failure: PlannedFailure) -> Self {
        self.failures.push_back(failure);
        self
    }
}

/// Scripted backend for tests. Functions without a plan compile to empty
/// code. Every attempt is logged.
#[derive(Debug, Default)]
pub struct TableBackend {
    plans: HashMap<FunctionId, CodePlan>,
    pub compile_log: Vec<(FunctionId, CompileParams)>,
}

impl TableBackend {
    pub fn new() -> Self {
        TableBackend::default()
    }

    pub fn plan(&mut self, function: FunctionId, plan: CodePlan) {
        self.plans.insert(function, plan);
    }

    /// Number of attempts made for `function`.
    pub fn attempts(&self, function: FunctionId) -> usize {
        self.compile_log.iter().filter(|(f, _)| *f == function).count()
    }
}

impl CompileBackend for TableBackend {
    fn compile(
        &mut self,
        program: &mut Program,
        function: FunctionId,
        params: &CompileParams,
    ) -> Result<CompiledCode, CompileError> {
        self.compile_log.push((function, *params));
        if let Some(plan) = self.plans.get_mut(&function) {
            if let Some(failure) = plan.failures.pop_front() {
                return Err(match failure {
                    PlannedFailure::Fatal(message) => CompileError::Fatal { function, message },
                    PlannedFailure::Bailout => CompileError::Bailout { function },
                    PlannedFailure::BranchRangeOverflow => {
                        CompileError::BranchRangeOverflow { function }
                    }
                    PlannedFailure::SpeculativeRollback => {
                        CompileError::SpeculativeRollback { function }
                    }
                });
            }
        }
        let addr = program.allocate_code_addr();
        let mut code = CompiledCode::at(addr);
        if let Some(plan) = self.plans.get(&function) {
            code.static_calls = plan.static_calls.clone();
            code.pool = plan.pool.clone();
            code.inlined_functions = plan.inlined_functions.clone();
            code.handler_types = plan.handler_types.clone();
        }
        Ok(code)
    }
}
