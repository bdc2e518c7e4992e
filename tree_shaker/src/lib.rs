#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

//! Whole-program reachability analysis and tree shaking for an ahead-of-time
//! compiler of a dynamically dispatched language.
//!
//! Given a loaded [`program::Program`] and a [`backend::CompileBackend`],
//! [`shake::shake_program`] compiles everything reachable from the roots to a
//! fixed point (dynamic dispatch is resolved open-world, by selector name),
//! prunes every function, field, class, library, type, and constant the
//! result does not need, and then runs the post-link passes: static-call
//! binding, dynamic call-site deduplication, and optional symbol
//! obfuscation.

pub mod backend;
pub mod link;
pub mod program;
pub mod shake;

pub use backend::{CodePlan, CompileBackend, CompileError, CompileParams, TableBackend};
pub use link::obfuscate::ObfuscationMap;
pub use shake::{
    shake_program, ShakeConfig, ShakeError, ShakeOutcome, ShakeResult, ShakeStats, TreeShaker,
};
