//! Canonicalized type values, type-argument vectors, and constants.
//!
//! Types, type-argument vectors, and constant instances are immutable and
//! globally canonicalized: structurally equal values share one arena entry,
//! so identity comparison on ids doubles as structural comparison. The global
//! canonical tables are open-addressed and support no deletion; the pruning
//! pass shrinks them by rebuilding from the surviving entries.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{ClassId, FunctionId};

/// Id of a canonicalized abstract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Id of a canonicalized type-argument vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeArgsId(pub u32);

/// Id of a canonicalized constant instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(pub u32);

/// Structure of an abstract type. Type graphs may be recursive (a class
/// implementing an interface parameterized over itself), so consumers must
/// mark types visited before recursing into them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The top type; also used where the analyzed program is untyped.
    Dynamic,
    /// A (possibly generic) interface type of a class.
    Interface {
        class: ClassId,
        args: Option<TypeArgsId>,
    },
    /// A function signature type.
    Function {
        params: Vec<TypeId>,
        result: TypeId,
    },
    /// A type parameter with its bound and the class that declares it.
    Parameter {
        bound: TypeId,
        owner: Option<ClassId>,
    },
}

/// A canonicalized abstract type.
#[derive(Debug, Clone)]
pub struct AbstractType {
    pub kind: TypeKind,
    /// Cleared when the pruning pass evicts the type from the global table.
    pub canonical: bool,
}

/// A canonicalized vector of type arguments.
#[derive(Debug, Clone)]
pub struct TypeArguments {
    pub types: Vec<TypeId>,
    pub canonical: bool,
}

/// A field value inside a constant. Scalars are immediate (unboxed) and are
/// never traced; the other variants are references the retention tracer
/// follows.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    /// A nested canonical constant.
    Object(ConstId),
    /// An embedded type, e.g. from a runtime type test or error message.
    Type(TypeId),
    TypeArgs(TypeArgsId),
    /// A closure constant; retains its function.
    Closure(FunctionId),
}

/// A canonicalized constant instance, owned by its class's constant pool.
#[derive(Debug, Clone)]
pub struct Constant {
    pub class: ClassId,
    pub type_args: Option<TypeArgsId>,
    pub fields: Vec<ConstValue>,
    /// Non-canonical instances (e.g. argument descriptors) are skipped by
    /// the retention tracer.
    pub canonical: bool,
}

/// Round `n` up to the next power of two (minimum 2).
pub fn round_up_to_power_of_two(n: usize) -> usize {
    n.next_power_of_two().max(2)
}

/// An open-addressed set of arena ids keyed by caller-supplied structural
/// hash and equality. Linear probing, no tombstones: entries cannot be
/// removed individually, the table is shrunk by rebuilding it from the
/// retained ids (this is why the pruning pass does a full rehash rather than
/// an in-place filter).
#[derive(Debug)]
pub struct CanonicalTable {
    slots: Vec<Option<(u64, u32)>>,
    occupied: usize,
}

impl CanonicalTable {
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        CanonicalTable {
            slots: vec![None; round_up_to_power_of_two(capacity)],
            occupied: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Find the id of an entry equal (per `eq`) to a probe value with the
    /// given hash.
    pub fn find(&self, hash: u64, eq: impl Fn(u32) -> bool) -> Option<u32> {
        let mask = self.slots.len() - 1;
        let mut i = (hash as usize) & mask;
        loop {
            match self.slots[i] {
                None => return None,
                Some((h, id)) if h == hash && eq(id) => return Some(id),
                Some(_) => i = (i + 1) & mask,
            }
        }
    }

    /// Insert an id with the given hash. Returns false if an equal entry
    /// (per `eq`) is already present.
    pub fn insert(&mut self, id: u32, hash: u64, eq: impl Fn(u32) -> bool) -> bool {
        if self.find(hash, &eq).is_some() {
            return false;
        }
        // Keep the load factor below 3/4 so probing stays short.
        if (self.occupied + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
        self.place(hash, id);
        self.occupied += 1;
        true
    }

    fn place(&mut self, hash: u64, id: u32) {
        let mask = self.slots.len() - 1;
        let mut i = (hash as usize) & mask;
        while self.slots[i].is_some() {
            i = (i + 1) & mask;
        }
        self.slots[i] = Some((hash, id));
    }

    fn grow(&mut self) {
        let old: Vec<(u64, u32)> = self.slots.iter().flatten().copied().collect();
        self.slots = vec![None; self.slots.len() * 2];
        for (hash, id) in old {
            self.place(hash, id);
        }
    }

    /// Iterate the stored ids in slot order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().flatten().map(|&(_, id)| id)
    }
}

impl Default for CanonicalTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
