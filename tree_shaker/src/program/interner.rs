//! Selector interning.
//!
//! Dynamic dispatch in the analyzed language is keyed by message name only
//! (deliberately receiver-type-unaware). Selectors are interned strings so
//! the reachability sets can work with cheap copyable ids, and so the
//! `get:`/`set:`/`dyn:` prefixed variants of a name can be derived and looked
//! up without string churn at every call site.

use std::collections::HashMap;

/// Interned dynamic-dispatch message name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub u32);

/// Prefix of getter selectors (`get:foo` reads `foo`).
pub const GETTER_PREFIX: &str = "get:";
/// Prefix of setter selectors (`set:foo` writes `foo`).
pub const SETTER_PREFIX: &str = "set:";
/// Prefix of dynamic-invocation forwarder selectors.
pub const DYN_PREFIX: &str = "dyn:";

/// The selector interner. Two built-in selectors are always present: the
/// no-such-method fallback and the generic `call` selector.
#[derive(Debug)]
pub struct SelectorTable {
    names: Vec<String>,
    index: HashMap<String, Selector>,
    no_such_method: Selector,
    call: Selector,
}

impl SelectorTable {
    pub fn new() -> Self {
        let mut table = SelectorTable {
            names: Vec::new(),
            index: HashMap::new(),
            no_such_method: Selector(0),
            call: Selector(0),
        };
        table.no_such_method = table.intern("noSuchMethod");
        table.call = table.intern("call");
        table
    }

    /// Intern a name, returning its selector. Idempotent.
    pub fn intern(&mut self, name: &str) -> Selector {
        if let Some(&sel) = self.index.get(name) {
            return sel;
        }
        let sel = Selector(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), sel);
        sel
    }

    /// Look a name up without interning it.
    pub fn lookup(&self, name: &str) -> Option<Selector> {
        self.index.get(name).copied()
    }

    pub fn name(&self, sel: Selector) -> &str {
        &self.names[sel.0 as usize]
    }

    /// The no-such-method fallback selector.
    pub fn no_such_method(&self) -> Selector {
        self.no_such_method
    }

    /// The generic `call` selector.
    pub fn call(&self) -> Selector {
        self.call
    }

    /// Intern the getter form of a selector: `foo` -> `get:foo`.
    pub fn getter_of(&mut self, sel: Selector) -> Selector {
        let name = format!("{}{}", GETTER_PREFIX, self.name(sel));
        self.intern(&name)
    }

    /// Look up (without interning) the getter form of a name.
    pub fn lookup_getter(&self, name: &str) -> Option<Selector> {
        self.lookup(&format!("{}{}", GETTER_PREFIX, name))
    }

    /// Look up (without interning) the dynamic-invocation forwarder form.
    pub fn lookup_forwarder(&self, name: &str) -> Option<Selector> {
        self.lookup(&format!("{}{}", DYN_PREFIX, name))
    }

    /// Strip the `get:` prefix, if present.
    pub fn name_from_getter(&self, sel: Selector) -> Option<&str> {
        self.name(sel).strip_prefix(GETTER_PREFIX)
    }

    pub fn is_getter_name(&self, sel: Selector) -> bool {
        self.name(sel).starts_with(GETTER_PREFIX)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Rewrite every interned name through `rename`. Used by the obfuscation
    /// pass; the selector ids themselves stay stable.
    pub fn rename_all(&mut self, mut rename: impl FnMut(&str) -> String) {
        self.index.clear();
        for (i, name) in self.names.iter_mut().enumerate() {
            *name = rename(name);
            self.index.insert(name.clone(), Selector(i as u32));
        }
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::new()
    }
}
