//! The retention trace.
//!
//! After the worklist reaches its fixed point, a second closure walks out
//! from the reachable functions collecting everything that must survive
//! pruning: signature and handler types, parent chains of closures, classes
//! named by retained types, and the constant graphs embedded in code. Type
//! graphs are cyclic, so every set insert happens before the recursion it
//! guards.

use crate::program::{FunctionId, TypeArgsId, TypeId, TypeKind};

use super::worklist::TreeShaker;

impl TreeShaker<'_> {
    /// Decide which functions survive and pull their types into the
    /// retained sets.
    pub(super) fn trace_for_retained_functions(&mut self) {
        // The top type backs every untyped signature slot.
        let dynamic = self.program.dynamic_type();
        self.add_type(dynamic);

        for f in self.program.all_function_ids() {
            let mut retain = self.is_reached(f);
            if !retain {
                // A compiled tear-off keeps the method it forwards to.
                if let Some(closure) = self.program.function(f).implicit_closure {
                    retain = self.is_reached(closure)
                        && self.program.function(closure).code.is_some();
                }
            }
            if retain {
                self.add_types_of_function(f);
            }
        }
        let closures = self.program.closure_functions.clone();
        for f in closures {
            if self.is_reached(f) {
                // Closures live outside member lists, so their owner class
                // must be pinned here.
                self.add_types_of_function(f);
                let owner = self.program.function(f).owner;
                self.add_types_of_class(owner);
            }
        }
        for f in self.program.all_function_ids() {
            self.program.drop_uncompiled_implicit_closure(f);
        }
    }

    /// Retain a function together with its signature types, its parent
    /// chain, its handler types, and everything inlined into it.
    pub(super) fn add_types_of_function(&mut self, f: FunctionId) {
        if !self.functions_to_retain.insert(f) {
            return;
        }
        let (params, result, parent, accessor_field, code) = {
            let function = self.program.function(f);
            (
                function.param_types.clone(),
                function.result_type,
                function.parent,
                function.accessor_field,
                function.code.clone(),
            )
        };
        for ty in params {
            self.add_type(ty);
        }
        self.add_type(result);
        if let Some(parent) = parent {
            self.add_types_of_function(parent);
        }
        if let Some(field) = accessor_field {
            self.fields_to_retain.insert(field);
        }
        if let Some(code) = code {
            for ty in code.handler_types {
                self.add_type(ty);
            }
            for inlined in code.inlined_functions {
                self.add_types_of_function(inlined);
            }
        }
    }

    pub(super) fn add_types_of_class(&mut self, class: crate::program::ClassId) {
        if !self.classes_to_retain.insert(class) {
            return;
        }
        let (type_params, supertype, interfaces) = {
            let cls = self.program.class(class);
            (cls.type_params, cls.supertype, cls.interfaces.clone())
        };
        if let Some(args) = type_params {
            self.add_type_arguments(args);
        }
        if let Some(ty) = supertype {
            self.add_type(ty);
        }
        for ty in interfaces {
            self.add_type(ty);
        }
    }

    pub(super) fn add_type(&mut self, ty: TypeId) {
        if !self.types_to_retain.insert(ty) {
            return;
        }
        match self.program.abstract_type(ty).kind.clone() {
            TypeKind::Dynamic => {}
            TypeKind::Interface { class, args } => {
                self.add_types_of_class(class);
                if let Some(args) = args {
                    self.add_type_arguments(args);
                }
            }
            TypeKind::Function { params, result } => {
                for param in params {
                    self.add_type(param);
                }
                self.add_type(result);
            }
            TypeKind::Parameter { bound, owner } => {
                self.add_type(bound);
                if let Some(owner) = owner {
                    self.add_types_of_class(owner);
                }
            }
        }
    }

    pub(super) fn add_type_arguments(&mut self, args: TypeArgsId) {
        if !self.typeargs_to_retain.insert(args) {
            return;
        }
        for ty in self.program.type_arguments(args).types.clone() {
            self.add_type(ty);
        }
    }

    /// Filter each class's constant pool down to the retained constants,
    /// decide class retention, and clear the CHA edges (nothing may consult
    /// them once classes start disappearing).
    pub(super) fn trace_types_from_retained_classes(&mut self) {
        for cid in self.program.class_ids() {
            let constants = self.program.class(cid).constants.clone();
            let retained: Vec<_> = constants
                .into_iter()
                .filter(|c| self.consts_to_retain.contains(c))
                .collect();
            let retain = {
                let cls = self.program.class(cid);
                // Member lists are already pruned, so non-empty means
                // retained members.
                !cls.functions.is_empty()
                    || !cls.fields.is_empty()
                    || cls.is_instantiated
                    || cls.is_enum
                    || !retained.is_empty()
            };
            self.program.class_mut(cid).constants = retained;
            self.program.class_mut(cid).direct_subclasses.clear();
            if retain {
                self.add_types_of_class(cid);
            }
        }
    }
}
