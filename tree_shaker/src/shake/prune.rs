//! Destructive pruning.
//!
//! Each drop pass permanently removes one kind of entity the retention trace
//! did not mark: member lists are rebuilt densely, the canonical tables are
//! rebuilt from the survivors (they support no per-entry deletion), library
//! dictionaries are rehashed, and finally classes and libraries are
//! unregistered outright. Dropping a class with live instances on the heap
//! is unrecoverable state corruption and panics.

use crate::program::{DictEntry, FieldId};

use super::worklist::TreeShaker;

impl TreeShaker<'_> {
    pub(super) fn drop_functions(&mut self) {
        for cid in self.program.class_ids() {
            let members = self.program.class(cid).functions.clone();
            let mut kept = Vec::with_capacity(members.len());
            for f in members {
                if self.functions_to_retain.contains(&f) {
                    kept.push(f);
                } else {
                    log::debug!("dropping function {}", self.program.qualified_name(f));
                    self.program.clear_code(f);
                    self.stats.functions_dropped += 1;
                }
            }
            self.program.class_mut(cid).functions = kept;
            let retained = &self.functions_to_retain;
            self.program
                .class_mut(cid)
                .retain_dispatchers(|f| retained.contains(&f));
        }
        let closures = self.program.closure_functions.clone();
        self.program.closure_functions = closures
            .into_iter()
            .filter(|f| self.functions_to_retain.contains(f))
            .collect();
    }

    fn field_retained(&self, field: FieldId) -> bool {
        self.field_is_reached(field) || self.fields_to_retain.contains(&field)
    }

    pub(super) fn drop_fields(&mut self) {
        for cid in self.program.class_ids() {
            let members = self.program.class(cid).fields.clone();
            let mut kept = Vec::with_capacity(members.len());
            for fid in members {
                if self.field_retained(fid) {
                    // Surviving fields pin their declared type; it backs
                    // runtime store checks.
                    let declared = self.program.field(fid).declared_type;
                    self.add_type(declared);
                    kept.push(fid);
                } else {
                    self.stats.fields_dropped += 1;
                }
            }
            self.program.class_mut(cid).fields = kept;
        }
    }

    pub(super) fn drop_types(&mut self) {
        let mut retained = Vec::new();
        for id in self.program.canonical_type_ids() {
            if self.types_to_retain.contains(&id) {
                retained.push(id);
            } else {
                self.program.abstract_type_mut(id).canonical = false;
                self.stats.types_dropped += 1;
            }
        }
        self.program.rebuild_canonical_types(&retained);
    }

    pub(super) fn drop_type_arguments(&mut self) {
        let mut retained = Vec::new();
        for id in self.program.canonical_type_args_ids() {
            if self.typeargs_to_retain.contains(&id) {
                retained.push(id);
            } else {
                self.program.type_arguments_mut(id).canonical = false;
                self.stats.type_args_dropped += 1;
            }
        }
        self.program.rebuild_canonical_type_args(&retained);
    }

    /// Null out dictionary entries for dropped symbols, then rehash each
    /// dictionary to its post-shake size. Resolution caches are discarded
    /// with the entries, except in the root library when the embedder still
    /// resolves through it.
    pub(super) fn drop_library_entries(&mut self) {
        let root = self.program.root_library();
        let retain_root_caches = self.program.retain_root_library_caches;
        for lib in self.program.library_ids() {
            let dictionary = self.program.library(lib).dictionary.clone();
            let mut kept = Vec::new();
            for entry in dictionary.into_iter().flatten() {
                let keep = match entry {
                    DictEntry::Class(c) => self.classes_to_retain.contains(&c),
                    DictEntry::Function(f) => self.functions_to_retain.contains(&f),
                    DictEntry::Field(fid) => self.field_retained(fid),
                };
                if keep {
                    kept.push(Some(entry));
                }
            }
            let capacity = kept.len() * 4 / 3 + 1;
            kept.resize_with(capacity.max(kept.len()), || None);
            let library = self.program.library_mut(lib);
            library.dictionary = kept;
            if !(Some(lib) == root && retain_root_caches) {
                library.caches_dropped = true;
            }
        }
    }

    /// Unregister classes nothing retained. Requires a full collection with
    /// sweepers joined first: dropping a class that still has instances on
    /// the heap would leave those instances without a class, so that is a
    /// fatal invariant violation, not an error to report.
    pub(super) fn drop_classes(&mut self) {
        self.program.heap.collect_all_garbage();
        self.program.heap.wait_for_sweeper_tasks();
        for cid in self.program.class_ids() {
            if self.program.class(cid).is_toplevel {
                continue;
            }
            // Core classes (the closure class among them) are referenced by
            // runtime stubs that the analysis cannot see.
            if self.program.library(self.program.class(cid).library).is_core {
                continue;
            }
            if self.classes_to_retain.contains(&cid) {
                continue;
            }
            assert!(
                !self.program.class(cid).is_instantiated,
                "instantiated class survived retention tracing"
            );
            let live = self.program.heap.instance_count(cid);
            if live != 0 {
                panic!(
                    "want to drop class `{}`, but it has {} live instances",
                    self.program.class(cid).name,
                    live
                );
            }
            log::debug!("dropping class {}", self.program.class(cid).name);
            self.program.unregister_class(cid);
            self.stats.classes_dropped += 1;
        }
    }

    /// Unregister libraries whose dictionary is empty, except core libraries
    /// (referenced by the runtime) and the root library. Surviving libraries
    /// are reindexed densely.
    pub(super) fn drop_libraries(&mut self) {
        let root = self.program.root_library();
        for lib in self.program.library_ids() {
            let keep = {
                let library = self.program.library(lib);
                let symbols = library.dictionary.iter().flatten().count();
                symbols > 0 || library.is_core || Some(lib) == root
            };
            if keep {
                continue;
            }
            let toplevel = self.program.library(lib).toplevel_class;
            log::debug!("dropping library {}", self.program.library(lib).name);
            self.program.unregister_class(toplevel);
            self.program.unregister_library(lib);
            self.stats.libraries_dropped += 1;
        }
        for (index, lib) in self.program.library_ids().into_iter().enumerate() {
            self.program.library_mut(lib).index = Some(index);
        }
    }
}
