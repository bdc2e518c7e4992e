//! Symbol obfuscation.
//!
//! Surviving symbols are renamed to short generated names drawn from a
//! carry-propagating alphabet (`a`..`z`, `A`..`Z`, then `aa`, `ab`, ...).
//! Renaming is structure-preserving: accessor and forwarder prefixes are
//! kept so a renamed getter still pairs with its renamed base selector,
//! dotted compound names are renamed piecewise, the trailing `=` of setter
//! names is kept, and private names (`_name@key`) get a fresh base with the
//! process-wide private key re-appended. Names the runtime itself resolves
//! are on a deny list and rename to themselves.
//!
//! The original-to-new mapping is recorded in insertion order and can be
//! serialized for symbolizing production stack traces.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::program::{Program, DYN_PREFIX, GETTER_PREFIX, SETTER_PREFIX};

/// Names the runtime resolves by string at execution time; renaming them
/// would break dispatch, so they map to themselves.
static DENY_LIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "main",
        "call",
        "noSuchMethod",
        "toString",
        "hashCode",
        "runtimeType",
        "index",
        "values",
        "==",
        "!=",
        "<",
        ">",
        "<=",
        ">=",
        "+",
        "-",
        "*",
        "/",
        "~/",
        "%",
        "[]",
        "[]=",
        "<<",
        ">>",
        "&",
        "|",
        "^",
        "~",
        "unary-",
    ]
    .into_iter()
    .collect()
});

/// The serializable rename map: `(original, renamed)` pairs in the order
/// the renames were assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObfuscationMap {
    pairs: Vec<(String, String)>,
}

impl ObfuscationMap {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.pairs.iter()
    }

    /// Serialize as a JSON array of pairs terminated by a null sentinel.
    pub fn to_json(&self) -> String {
        let mut entries: Vec<serde_json::Value> = self
            .pairs
            .iter()
            .map(|(original, renamed)| serde_json::json!([original, renamed]))
            .collect();
        entries.push(serde_json::Value::Null);
        serde_json::Value::Array(entries).to_string()
    }

    /// Parse the serialized form; entries after the null sentinel are
    /// ignored.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let mut pairs = Vec::new();
        if let serde_json::Value::Array(items) = value {
            for item in items {
                if item.is_null() {
                    break;
                }
                pairs.push(serde_json::from_value(item)?);
            }
        }
        Ok(ObfuscationMap { pairs })
    }

    /// Map a renamed symbol back to its original name. Linear scan; this
    /// runs offline when symbolizing, never in the compiler.
    pub fn deobfuscate(&self, renamed: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(_, r)| r == renamed)
            .map(|(original, _)| original.as_str())
    }
}

#[derive(Debug)]
pub struct Obfuscator {
    renames: HashMap<String, String>,
    order: Vec<String>,
    taken: HashSet<String>,
    name_state: Vec<u8>,
    private_key: String,
}

impl Obfuscator {
    pub fn new(private_key: &str) -> Self {
        Obfuscator {
            renames: HashMap::new(),
            order: Vec::new(),
            taken: HashSet::new(),
            name_state: Vec::new(),
            private_key: private_key.to_string(),
        }
    }

    /// Rename a symbol, memoized: the same input always maps to the same
    /// output. `atomic` names are renamed as a unit with no structural
    /// decomposition.
    pub fn rename(&mut self, name: &str, atomic: bool) -> String {
        if let Some(existing) = self.renames.get(name) {
            return existing.clone();
        }
        let renamed = self.build_rename(name, atomic);
        self.renames.insert(name.to_string(), renamed.clone());
        self.order.push(name.to_string());
        renamed
    }

    fn build_rename(&mut self, name: &str, atomic: bool) -> String {
        if atomic {
            return self.rename_atom(name);
        }
        for prefix in [GETTER_PREFIX, SETTER_PREFIX, DYN_PREFIX] {
            if let Some(rest) = name.strip_prefix(prefix) {
                return format!("{}{}", prefix, self.rename(rest, false));
            }
        }
        // `foo=` is the setter form of `foo`; the comparison and index-set
        // operators are the only names with a literal trailing `=`.
        if name.len() > 1 && name.ends_with('=') && !matches!(name, "==" | "<=" | ">=" | "[]=") {
            let base = &name[..name.len() - 1];
            return format!("{}=", self.rename(base, false));
        }
        if name.contains('.') {
            let parts: Vec<String> = name
                .split('.')
                .map(|part| self.rename(part, false))
                .collect();
            return parts.join(".");
        }
        if let Some((base, _key)) = name.split_once('@') {
            let base = base.to_string();
            let renamed = self.rename(&base, true);
            return format!("{}@{}", renamed, self.private_key);
        }
        self.rename_atom(name)
    }

    fn rename_atom(&mut self, name: &str) -> String {
        if name.is_empty() || DENY_LIST.contains(name) {
            return name.to_string();
        }
        loop {
            step_name(&mut self.name_state);
            let candidate = String::from_utf8_lossy(&self.name_state).into_owned();
            if candidate != name
                && !DENY_LIST.contains(candidate.as_str())
                && !self.taken.contains(&candidate)
            {
                self.taken.insert(candidate.clone());
                return candidate;
            }
        }
    }

    pub fn into_map(self) -> ObfuscationMap {
        let pairs = self
            .order
            .into_iter()
            .map(|original| {
                let renamed = self.renames[&original].clone();
                (original, renamed)
            })
            .collect();
        ObfuscationMap { pairs }
    }
}

/// Advance the generated-name state: least significant position first,
/// `a`..`z` then `A`..`Z`, carrying into the next position after `Z`.
fn step_name(state: &mut Vec<u8>) {
    for ch in state.iter_mut() {
        match *ch {
            b'z' => {
                *ch = b'A';
                return;
            }
            b'Z' => {
                // Carry into the next position.
                *ch = b'a';
            }
            _ => {
                *ch += 1;
                return;
            }
        }
    }
    state.push(b'a');
}

/// Rename every surviving symbol of the program: the selector table, class
/// names, and non-core library names. Returns the rename map.
pub fn obfuscate_program(program: &mut Program, private_key: &str) -> ObfuscationMap {
    let mut obfuscator = Obfuscator::new(private_key);
    program
        .selectors
        .rename_all(|name| obfuscator.rename(name, false));
    for cid in program.class_ids() {
        let (library, is_toplevel, name) = {
            let cls = program.class(cid);
            (cls.library, cls.is_toplevel, cls.name.clone())
        };
        if is_toplevel || program.library(library).is_core {
            continue;
        }
        program.class_mut(cid).name = obfuscator.rename(&name, false);
    }
    for lib in program.library_ids() {
        if program.library(lib).is_core {
            continue;
        }
        let name = program.library(lib).name.clone();
        program.library_mut(lib).name = obfuscator.rename(&name, true);
    }
    obfuscator.into_map()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_names(n: usize) -> Vec<String> {
        let mut state = Vec::new();
        (0..n)
            .map(|_| {
                step_name(&mut state);
                String::from_utf8_lossy(&state).into_owned()
            })
            .collect()
    }

    #[test]
    fn test_generated_name_sequence() {
        let names = all_names(53);
        assert_eq!(names[0], "a");
        assert_eq!(names[25], "z");
        assert_eq!(names[26], "A");
        assert_eq!(names[51], "Z");
        assert_eq!(names[52], "aa");
    }

    #[test]
    fn test_rename_is_memoized() {
        let mut obfuscator = Obfuscator::new("");
        let a = obfuscator.rename("foo", false);
        let b = obfuscator.rename("foo", false);
        assert_eq!(a, b);
        let c = obfuscator.rename("bar", false);
        assert_ne!(a, c);
    }

    #[test]
    fn test_getter_tracks_base_selector() {
        let mut obfuscator = Obfuscator::new("");
        let base = obfuscator.rename("foo", false);
        let getter = obfuscator.rename("get:foo", false);
        assert_eq!(getter, format!("get:{}", base));
        let setter = obfuscator.rename("set:foo", false);
        assert_eq!(setter, format!("set:{}", base));
        let forwarder = obfuscator.rename("dyn:foo", false);
        assert_eq!(forwarder, format!("dyn:{}", base));
    }

    #[test]
    fn test_setter_suffix_preserved() {
        let mut obfuscator = Obfuscator::new("");
        let base = obfuscator.rename("foo", false);
        let setter = obfuscator.rename("foo=", false);
        assert_eq!(setter, format!("{}=", base));
        // Comparison operators keep their `=` untouched.
        assert_eq!(obfuscator.rename("==", false), "==");
        assert_eq!(obfuscator.rename("<=", false), "<=");
        assert_eq!(obfuscator.rename("[]=", false), "[]=");
    }

    #[test]
    fn test_compound_names_rename_piecewise() {
        let mut obfuscator = Obfuscator::new("");
        let cls = obfuscator.rename("Box", false);
        let member = obfuscator.rename("unwrap", false);
        let compound = obfuscator.rename("Box.unwrap", false);
        assert_eq!(compound, format!("{}.{}", cls, member));
    }

    #[test]
    fn test_private_names_keep_key() {
        let mut obfuscator = Obfuscator::new("7f");
        let renamed = obfuscator.rename("_secret@11", false);
        assert!(renamed.ends_with("@7f"));
        assert!(!renamed.starts_with("_secret"));
    }

    #[test]
    fn test_deny_list_renames_to_self() {
        let mut obfuscator = Obfuscator::new("");
        assert_eq!(obfuscator.rename("main", false), "main");
        assert_eq!(obfuscator.rename("noSuchMethod", false), "noSuchMethod");
        assert_eq!(obfuscator.rename("call", false), "call");
    }

    #[test]
    fn test_map_round_trips_through_json() {
        let mut obfuscator = Obfuscator::new("");
        obfuscator.rename("foo", false);
        obfuscator.rename("bar", false);
        let map = obfuscator.into_map();
        let text = map.to_json();
        assert!(text.ends_with(",null]"));
        let parsed = ObfuscationMap::from_json(&text).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn test_deobfuscate_linear_scan() {
        let mut obfuscator = Obfuscator::new("");
        let renamed = obfuscator.rename("handler", false);
        let map = obfuscator.into_map();
        assert_eq!(map.deobfuscate(&renamed), Some("handler"));
        assert_eq!(map.deobfuscate("never"), None);
    }
}
