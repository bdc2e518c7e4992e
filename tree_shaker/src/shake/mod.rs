//! Whole-program tree shaking.
//!
//! The pass runs in the fixed order established by ahead-of-time compilers
//! for open-world dynamic dispatch: finalize class layouts, eagerly
//! precompile constructors, seed the roots, iterate the compile/scan worklist
//! to a fixed point, then trace retention, prune every dead entity, and run
//! the post-link passes. [`shake_program`] is the whole pipeline behind one
//! call.

pub mod dispatch;
pub mod prune;
pub mod retain;
pub mod sets;
pub mod worklist;

use thiserror::Error;

use crate::backend::{CompileBackend, CompileError};
use crate::link::obfuscate::{obfuscate_program, ObfuscationMap};
use crate::link::{bind_static_calls, dedup_unlinked_calls};
use crate::program::{FunctionId, Program, Selector};

pub use worklist::TreeShaker;

#[derive(Debug, Error)]
pub enum ShakeError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// No roots were supplied and the root library has no `main`.
    #[error("library '{library}' has no main function")]
    MissingMain { library: String },
}

pub type ShakeResult<T> = Result<T, ShakeError>;

/// Pass configuration.
#[derive(Debug, Clone)]
pub struct ShakeConfig {
    /// How many speculative rollbacks to tolerate per function before
    /// retrying with speculation disabled.
    pub max_speculative_inlining_attempts: usize,
    /// Precompute the table of dynamic selectors with a unique target.
    pub collect_dynamic_function_names: bool,
    /// Rename surviving symbols after pruning.
    pub obfuscate: bool,
    /// Key appended to obfuscated private names; defaults to the empty key.
    pub obfuscation_private_key: Option<String>,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        ShakeConfig {
            max_speculative_inlining_attempts: 1,
            collect_dynamic_function_names: true,
            obfuscate: false,
            obfuscation_private_key: None,
        }
    }
}

/// Counters reported by one run of the pass.
#[derive(Debug, Default, Clone)]
pub struct ShakeStats {
    pub functions_compiled: usize,
    pub compile_retries: usize,
    pub classes_instantiated: usize,
    pub functions_retained: usize,
    pub functions_dropped: usize,
    pub fields_dropped: usize,
    pub classes_dropped: usize,
    pub libraries_dropped: usize,
    pub types_dropped: usize,
    pub type_args_dropped: usize,
    pub selectors_sent: usize,
    pub static_calls_bound: usize,
    pub unlinked_calls_deduped: usize,
    pub symbols_renamed: usize,
}

/// What a run retained, plus its counters and (when enabled) the rename map.
#[derive(Debug)]
pub struct ShakeOutcome {
    pub stats: ShakeStats,
    pub retained_functions: Vec<FunctionId>,
    pub sent_selectors: Vec<Selector>,
    pub renames: Option<ObfuscationMap>,
}

/// Run the whole pass: reachability, retention, pruning, and post-link.
///
/// `roots` are extra entry points beyond the root library's `main`; when
/// empty, a missing `main` is an error.
pub fn shake_program(
    program: &mut Program,
    backend: &mut dyn CompileBackend,
    roots: &[FunctionId],
    config: &ShakeConfig,
) -> ShakeResult<ShakeOutcome> {
    let mut shaker = TreeShaker::new(program, backend, config.clone());
    shaker.shake(roots)?;
    let (mut stats, retained_functions, sent_selectors) = shaker.into_results();

    stats.static_calls_bound = bind_static_calls(program);
    stats.unlinked_calls_deduped = dedup_unlinked_calls(program);

    let renames = if config.obfuscate {
        let key = config.obfuscation_private_key.as_deref().unwrap_or("");
        let map = obfuscate_program(program, key);
        stats.symbols_renamed = map.len();
        Some(map)
    } else {
        None
    };

    log::info!(
        "tree shaking done: {} functions retained, {} dropped, {} classes dropped, {} libraries dropped",
        stats.functions_retained,
        stats.functions_dropped,
        stats.classes_dropped,
        stats.libraries_dropped
    );

    Ok(ShakeOutcome {
        stats,
        retained_functions,
        sent_selectors,
        renames,
    })
}
