//! Dynamic dispatch resolution.
//!
//! Dispatch is open-world and name-based: a sent selector conservatively
//! reaches the matching member of every instantiated class. Beyond the
//! direct match, four indirect forms are resolved here: call-through-getter,
//! tear-off closurization, dynamic-invocation forwarders, and invocation
//! dispatchers for callable-typed fields.

use std::collections::HashMap;

use crate::program::{ArgsShape, FunctionId, FunctionKind, Selector, TypeKind};

use super::worklist::TreeShaker;

impl TreeShaker<'_> {
    /// Match the sent-selector set against the members of every
    /// instantiated class, adding newly reached targets.
    pub(super) fn check_for_new_dynamic_functions(&mut self) {
        for cid in self.program.class_ids() {
            if !self.program.class(cid).is_instantiated {
                continue;
            }
            let members = self.program.class(cid).functions.clone();
            for f in members {
                let (is_static, is_abstract, kind, name, has_tearoff, has_dyn) = {
                    let function = self.program.function(f);
                    (
                        function.is_static,
                        function.is_abstract,
                        function.kind,
                        function.name,
                        function.has_tearoff_uses,
                        function.has_dynamic_invocations,
                    )
                };
                if is_static || is_abstract {
                    continue;
                }

                if self.is_sent(name) {
                    self.add_function(f);
                }

                let name_str = self.program.selectors.name(name).to_string();
                match kind {
                    FunctionKind::Regular => {
                        // A sent `get:name` tears the method off: the
                        // extractor returns the implicit closure.
                        // Only members the front end observed being torn
                        // off get the closure/extractor pair.
                        if has_tearoff {
                            if let Some(getter) = self.program.selectors.lookup_getter(&name_str)
                            {
                                if self.is_sent(getter) {
                                    let closure = self.program.ensure_implicit_closure(f);
                                    let extractor =
                                        self.program.ensure_method_extractor(f, getter);
                                    self.add_function(closure);
                                    self.add_function(extractor);
                                    let closure_class = self.program.closure_class();
                                    self.add_instantiated_class(closure_class);
                                }
                            }
                        }
                    }
                    FunctionKind::Getter | FunctionKind::ImplicitGetter => {
                        // Call-through-getter: `foo(...)` reads `foo` and
                        // invokes the result via the (already sent) `call`
                        // selector.
                        if let Some(base) = self
                            .program
                            .selectors
                            .name_from_getter(name)
                            .map(str::to_string)
                        {
                            let base_sent = self
                                .program
                                .selectors
                                .lookup(&base)
                                .map(|sel| self.is_sent(sel))
                                .unwrap_or(false);
                            let dyn_sent = self
                                .program
                                .selectors
                                .lookup_forwarder(&base)
                                .map(|sel| self.is_sent(sel))
                                .unwrap_or(false);
                            if base_sent || dyn_sent {
                                self.add_function(f);
                            }
                        }
                    }
                    _ => {}
                }

                // Dynamically typed call sites go through the checked
                // forwarder.
                if has_dyn {
                    if let Some(dyn_sel) = self.program.selectors.lookup_forwarder(&name_str) {
                        if self.is_sent(dyn_sel) {
                            let forwarder = self.program.ensure_dynamic_forwarder(f, dyn_sel);
                            self.add_function(forwarder);
                        }
                    }
                }
            }
        }
    }

    /// Function-typed instance fields whose name is sent as a selector are
    /// invokable; every concrete subclass of the declaring class gets an
    /// invocation dispatcher for the field's argument shape.
    pub(super) fn collect_callback_fields(&mut self) {
        for cid in self.program.class_ids() {
            if !self.program.class(cid).is_instantiated {
                continue;
            }
            let fields = self.program.class(cid).fields.clone();
            for fid in fields {
                let (is_static, name, ty) = {
                    let field = self.program.field(fid);
                    (field.is_static, field.name, field.declared_type)
                };
                if is_static || !self.is_sent(name) {
                    continue;
                }
                let param_count = match &self.program.abstract_type(ty).kind {
                    TypeKind::Function { params, .. } => params.len() as u32,
                    _ => continue,
                };
                let shape = ArgsShape::positional(param_count);
                for subclass in self.program.concrete_subclasses(cid) {
                    let dispatcher =
                        self.program.ensure_invocation_dispatcher(subclass, name, shape);
                    self.add_function(dispatcher);
                }
            }
        }
    }

    /// A call through the generic `call` selector may land on a closure;
    /// the shared closure class gets a dispatcher per argument shape.
    pub(super) fn add_closure_call(&mut self, shape: ArgsShape) {
        let call = self.program.selectors.call();
        let closure_class = self.program.closure_class();
        let dispatcher = self.program.ensure_invocation_dispatcher(closure_class, call, shape);
        self.add_instantiated_class(closure_class);
        self.add_function(dispatcher);
    }

    /// Precompute the dynamic selectors with exactly one possible target
    /// across the whole program; later passes can devirtualize those sites.
    pub(super) fn collect_dynamic_function_names(&mut self) {
        let mut unique: HashMap<Selector, Option<FunctionId>> = HashMap::new();
        for cid in self.program.class_ids() {
            for &f in &self.program.class(cid).functions {
                let (is_static, kind, name) = {
                    let function = self.program.function(f);
                    (function.is_static, function.kind, function.name)
                };
                if is_static {
                    continue;
                }
                unique
                    .entry(name)
                    .and_modify(|entry| *entry = None)
                    .or_insert(Some(f));
                // Getters are candidates under their bare name too, for
                // call-through-getter sites.
                if matches!(kind, FunctionKind::Getter | FunctionKind::ImplicitGetter) {
                    let base = self
                        .program
                        .selectors
                        .name_from_getter(name)
                        .and_then(|base| self.program.selectors.lookup(base));
                    if let Some(base) = base {
                        unique
                            .entry(base)
                            .and_modify(|entry| *entry = None)
                            .or_insert(Some(f));
                    }
                }
            }
        }
        self.program.unique_dynamic_targets = unique
            .into_iter()
            .filter_map(|(selector, target)| target.map(|f| (selector, f)))
            .collect();
        self.program.get_runtime_type_is_unique = self
            .program
            .selectors
            .lookup("get:runtimeType")
            .map(|sel| self.program.unique_dynamic_targets.contains_key(&sel))
            .unwrap_or(false);
    }
}
