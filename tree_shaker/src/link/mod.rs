//! Post-link passes.
//!
//! These run on the pruned program, once code addresses are final: late-bound
//! static calls are rewritten to direct address calls, structurally identical
//! dynamic call-site descriptors are shared, and (optionally) surviving
//! symbols are renamed.

pub mod obfuscate;

use std::collections::HashMap;

use crate::program::{
    ArgsShape, CodeAddr, FunctionId, PoolEntry, Program, Selector, StaticCallEntry,
    UnlinkedCallId,
};

/// Rewrite every stub-routed static call to a direct call on the target's
/// final code address. A compiled unit whose table ends up all-direct no
/// longer needs it and has it discarded. Returns the number of calls bound.
pub fn bind_static_calls(program: &mut Program) -> usize {
    let mut addresses: HashMap<FunctionId, CodeAddr> = HashMap::new();
    for f in program.all_function_ids() {
        if let Some(code) = &program.function(f).code {
            addresses.insert(f, code.addr);
        }
    }

    let mut bound = 0;
    for f in program.all_function_ids() {
        if program.function(f).code.is_none() {
            continue;
        }
        let mut code = program.function(f).code.clone().unwrap_or_default();
        for entry in &mut code.static_calls {
            if let StaticCallEntry::CallViaStub { target } = *entry {
                let addr = addresses
                    .get(&target)
                    .copied()
                    .expect("static call target survived shaking without code");
                *entry = StaticCallEntry::Direct { target, addr };
                bound += 1;
            }
        }
        if code.only_direct_calls() {
            code.static_calls.clear();
        }
        program.function_mut(f).code = Some(code);
    }
    log::debug!("bound {} static calls", bound);
    bound
}

/// Share one descriptor per (selector, argument shape) pair across every
/// object pool. Returns the number of pool entries rewritten.
pub fn dedup_unlinked_calls(program: &mut Program) -> usize {
    let mut canonical: HashMap<(Selector, ArgsShape), UnlinkedCallId> = HashMap::new();
    let mut rewritten = 0;

    let mut dedup_pool = |pool: &mut Vec<PoolEntry>,
                          program_calls: &dyn Fn(UnlinkedCallId) -> (Selector, ArgsShape)| {
        for entry in pool.iter_mut() {
            if let PoolEntry::UnlinkedCall(id) = *entry {
                let key = program_calls(id);
                match canonical.get(&key) {
                    Some(&existing) if existing != id => {
                        *entry = PoolEntry::UnlinkedCall(existing);
                        rewritten += 1;
                    }
                    Some(_) => {}
                    None => {
                        canonical.insert(key, id);
                    }
                }
            }
        }
    };

    let mut global = std::mem::take(&mut program.global_pool);
    dedup_pool(&mut global, &|id| {
        let call = program.unlinked_call(id);
        (call.selector, call.shape)
    });
    program.global_pool = global;

    for f in program.all_function_ids() {
        let Some(mut code) = program.function(f).code.clone() else {
            continue;
        };
        dedup_pool(&mut code.pool, &|id| {
            let call = program.unlinked_call(id);
            (call.selector, call.shape)
        });
        program.function_mut(f).code = Some(code);
    }
    log::debug!("deduplicated {} dynamic call sites", rewritten);
    rewritten
}
