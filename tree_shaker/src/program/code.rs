//! Compiled-code descriptors.
//!
//! The backend reports each compiled unit as a [`CompiledCode`]: a final code
//! address plus the tables the tree shaker scans for newly discovered callees
//! (static-call table, object pool, inlined-function list) and the
//! exception-handler types the retention tracer follows. The descriptors are
//! deliberately architecture-free; actual instruction bytes live behind the
//! backend.

use super::types::{ConstId, TypeId};
use super::{ClassId, FieldId, FunctionId, Selector};

/// Final address assigned to a unit of compiled code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeAddr(pub u32);

/// Id of an unlinked dynamic call descriptor in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnlinkedCallId(pub u32);

/// Shape of an argument list at a call site: how many type arguments and how
/// many positional arguments. Two dynamic call sites with equal selector and
/// equal shape are structurally identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgsShape {
    pub type_args: u32,
    pub positional: u32,
}

impl ArgsShape {
    pub fn positional(count: u32) -> Self {
        ArgsShape {
            type_args: 0,
            positional: count,
        }
    }
}

/// A dynamic call-site descriptor not yet bound to a dispatch cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnlinkedCall {
    pub selector: Selector,
    pub shape: ArgsShape,
}

/// One entry of a compiled unit's static-call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticCallEntry {
    /// A late-bound call routed through the generic call-static-function
    /// stub; rewritten to `Direct` by the static-call binding pass.
    CallViaStub { target: FunctionId },
    /// A call already bound to its target's final code address.
    Direct { target: FunctionId, addr: CodeAddr },
    /// A call into a class's allocation stub. Never rewritten.
    AllocStub { class: ClassId },
}

/// One entry of a compiled unit's object pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEntry {
    /// A dynamic call site.
    UnlinkedCall(UnlinkedCallId),
    /// A field reference; may require a lazily compiled static initializer.
    Field(FieldId),
    /// An embedded canonical constant.
    Const(ConstId),
    /// A direct function reference (e.g. a local closure).
    Function(FunctionId),
    /// An allocation stub reference.
    AllocStub(ClassId),
}

/// The shaker-visible result of compiling one callable.
#[derive(Debug, Clone, Default)]
pub struct CompiledCode {
    pub addr: CodeAddr,
    pub static_calls: Vec<StaticCallEntry>,
    pub pool: Vec<PoolEntry>,
    /// Functions whose bodies were inlined into this unit. They need their
    /// types retained even when never called outright.
    pub inlined_functions: Vec<FunctionId>,
    /// Types named by this unit's exception handlers.
    pub handler_types: Vec<TypeId>,
}

impl CompiledCode {
    pub fn at(addr: CodeAddr) -> Self {
        CompiledCode {
            addr,
            ..Default::default()
        }
    }

    /// True once every remaining static-call entry is address-relative; the
    /// binding pass discards the table at that point to save space.
    pub fn only_direct_calls(&self) -> bool {
        self.static_calls
            .iter()
            .all(|entry| matches!(entry, StaticCallEntry::Direct { .. }))
    }
}
