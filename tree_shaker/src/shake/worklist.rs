//! The fixed-point worklist.
//!
//! Reachability is computed by alternating two phases until neither makes
//! progress: draining the pending-function queue (compiling each function and
//! scanning its code for callees), and re-matching the sent-selector set
//! against the members of instantiated classes. Any discovery sets `changed`,
//! which forces another round.

use crate::backend::{CompileBackend, CompileError, CompileParams};
use crate::program::{
    ClassId, ConstId, ConstValue, EntryPoint, FieldId, FunctionId, FunctionKind, PoolEntry,
    Program, Selector, StaticCallEntry, TypeArgsId, TypeId,
};

use super::sets::RetainedSet;
use super::{ShakeConfig, ShakeError, ShakeResult, ShakeStats};

pub struct TreeShaker<'a> {
    pub(super) program: &'a mut Program,
    pub(super) backend: &'a mut dyn CompileBackend,
    pub(super) config: ShakeConfig,
    pub(super) stats: ShakeStats,

    /// Set whenever any phase discovers something new.
    pub(super) changed: bool,
    pub(super) pending: Vec<FunctionId>,
    /// Every function ever enqueued; the call-reachable set.
    pub(super) enqueued: RetainedSet<FunctionId>,
    pub(super) sent_selectors: RetainedSet<Selector>,
    pub(super) instantiated: RetainedSet<ClassId>,
    pub(super) seen_fields: RetainedSet<FieldId>,
    pub(super) seen_consts: RetainedSet<ConstId>,

    // Filled by the retention trace after the worklist reaches fixed point.
    pub(super) functions_to_retain: RetainedSet<FunctionId>,
    pub(super) fields_to_retain: RetainedSet<FieldId>,
    pub(super) classes_to_retain: RetainedSet<ClassId>,
    pub(super) types_to_retain: RetainedSet<TypeId>,
    pub(super) typeargs_to_retain: RetainedSet<TypeArgsId>,
    pub(super) consts_to_retain: RetainedSet<ConstId>,
}

impl<'a> TreeShaker<'a> {
    pub fn new(
        program: &'a mut Program,
        backend: &'a mut dyn CompileBackend,
        config: ShakeConfig,
    ) -> Self {
        TreeShaker {
            program,
            backend,
            config,
            stats: ShakeStats::default(),
            changed: false,
            pending: Vec::new(),
            enqueued: RetainedSet::new(),
            sent_selectors: RetainedSet::new(),
            instantiated: RetainedSet::new(),
            seen_fields: RetainedSet::new(),
            seen_consts: RetainedSet::new(),
            functions_to_retain: RetainedSet::new(),
            fields_to_retain: RetainedSet::new(),
            classes_to_retain: RetainedSet::new(),
            types_to_retain: RetainedSet::new(),
            typeargs_to_retain: RetainedSet::new(),
            consts_to_retain: RetainedSet::new(),
        }
    }

    /// Run reachability, retention, and pruning. Post-link passes run
    /// separately on the pruned program.
    pub fn shake(&mut self, roots: &[FunctionId]) -> ShakeResult<()> {
        self.program.finalize_all_classes();
        self.precompile_constructors()?;
        if self.config.collect_dynamic_function_names {
            self.collect_dynamic_function_names();
        }
        self.add_roots(roots)?;
        self.add_annotated_roots();
        self.iterate()?;
        // From here on the program is frozen: no compilation, only pruning.
        self.program.set_compilation_allowed(false);

        self.trace_for_retained_functions();
        self.drop_functions();
        self.drop_fields();
        self.trace_types_from_retained_classes();
        self.drop_types();
        self.drop_type_arguments();
        self.drop_library_entries();
        self.drop_classes();
        self.drop_libraries();

        self.stats.functions_retained = self.functions_to_retain.len();
        self.stats.selectors_sent = self.sent_selectors.len();
        self.stats.classes_instantiated = self.instantiated.len();
        Ok(())
    }

    pub fn stats(&self) -> &ShakeStats {
        &self.stats
    }

    pub fn into_results(self) -> (ShakeStats, Vec<FunctionId>, Vec<Selector>) {
        (
            self.stats,
            self.functions_to_retain.iter().copied().collect(),
            self.sent_selectors.iter().copied().collect(),
        )
    }

    // -----------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------

    /// Constructors are compiled before the main loop so field-guard
    /// information observed during their compilation is stable for every
    /// later optimized compile. The resulting code is discarded both ways.
    fn precompile_constructors(&mut self) -> ShakeResult<()> {
        self.program.clear_all_code();
        for f in self.program.all_function_ids() {
            let function = self.program.function(f);
            if function.kind == FunctionKind::Constructor && !function.is_abstract {
                log::debug!("precompiling constructor {}", self.program.qualified_name(f));
                self.compile_function(f)?;
            }
        }
        self.program.clear_all_code();
        Ok(())
    }

    fn add_roots(&mut self, roots: &[FunctionId]) -> ShakeResult<()> {
        // The fallback selectors are sent by the runtime itself.
        let nsm = self.program.selectors.no_such_method();
        let call = self.program.selectors.call();
        self.add_selector(nsm);
        self.add_selector(call);

        for &root in roots {
            self.add_function(root);
        }
        match self.program.lookup_main() {
            Some(main) => self.add_function(main),
            None if roots.is_empty() => {
                let library = match self.program.root_library() {
                    Some(lib) => self.program.library(lib).name.clone(),
                    None => "<no root library>".to_string(),
                };
                return Err(ShakeError::MissingMain { library });
            }
            None => {}
        }

        let global_pool = self.program.global_pool.clone();
        for entry in global_pool {
            self.add_pool_entry(entry);
        }
        Ok(())
    }

    /// Entry-point annotations keep members reachable for embedder code the
    /// analysis cannot see.
    fn add_annotated_roots(&mut self) {
        for cid in self.program.class_ids() {
            if self.program.class(cid).entry_point == EntryPoint::Always {
                self.add_instantiated_class(cid);
            }
        }
        for f in self.program.all_function_ids() {
            let (entry, kind, is_abstract, name, owner) = {
                let function = self.program.function(f);
                (
                    function.entry_point,
                    function.kind,
                    function.is_abstract,
                    function.name,
                    function.owner,
                )
            };
            if is_abstract {
                continue;
            }
            match entry {
                EntryPoint::Always | EntryPoint::CallOnly => {
                    self.add_function(f);
                    // An embedder-invoked constructor instantiates its class.
                    if kind == FunctionKind::Constructor {
                        self.add_instantiated_class(owner);
                    }
                    // An `Always` method may also be torn off by the
                    // embedder, not just called.
                    if entry == EntryPoint::Always && kind == FunctionKind::Regular {
                        let getter = self.program.selectors.getter_of(name);
                        let closure = self.program.ensure_implicit_closure(f);
                        let extractor = self.program.ensure_method_extractor(f, getter);
                        self.add_function(closure);
                        self.add_function(extractor);
                    }
                }
                EntryPoint::GetterOnly => match kind {
                    FunctionKind::Getter
                    | FunctionKind::ImplicitGetter
                    | FunctionKind::ImplicitStaticGetter => self.add_function(f),
                    _ => {
                        // The embedder tears the method off through its
                        // getter.
                        let getter = self.program.selectors.getter_of(name);
                        let closure = self.program.ensure_implicit_closure(f);
                        let extractor = self.program.ensure_method_extractor(f, getter);
                        self.add_function(closure);
                        self.add_function(extractor);
                    }
                },
                EntryPoint::SetterOnly => {
                    if matches!(kind, FunctionKind::Setter | FunctionKind::ImplicitSetter) {
                        self.add_function(f);
                    }
                }
                EntryPoint::Never => {}
            }
        }
        for fid in self.program.all_field_ids() {
            let entry = self.program.field(fid).entry_point;
            if entry == EntryPoint::Never {
                continue;
            }
            self.add_field(fid);
            // Only the accessors matching the pragma kind go with it: a
            // getter-only field must not root its setter, and vice versa.
            let owner = self.program.field(fid).owner;
            let members = self.program.class(owner).functions.clone();
            for f in members {
                let function = self.program.function(f);
                if function.accessor_field != Some(fid) {
                    continue;
                }
                let rooted = match function.kind {
                    FunctionKind::Getter
                    | FunctionKind::ImplicitGetter
                    | FunctionKind::ImplicitStaticGetter => entry != EntryPoint::SetterOnly,
                    FunctionKind::Setter | FunctionKind::ImplicitSetter => {
                        entry != EntryPoint::GetterOnly
                    }
                    _ => false,
                };
                if rooted {
                    self.add_function(f);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // The fixed point
    // -----------------------------------------------------------------

    fn iterate(&mut self) -> ShakeResult<()> {
        self.changed = true;
        while self.changed {
            self.changed = false;
            while let Some(f) = self.pending.pop() {
                self.process_function(f)?;
            }
            self.check_for_new_dynamic_functions();
            self.collect_callback_fields();
        }
        Ok(())
    }

    fn process_function(&mut self, f: FunctionId) -> ShakeResult<()> {
        if self.program.function(f).is_abstract {
            return Ok(());
        }
        if self.program.function(f).code.is_none() {
            log::debug!("processing function {}", self.program.qualified_name(f));
            self.compile_function(f)?;
        }
        self.add_callees_of(f);
        Ok(())
    }

    /// Compile with the retry policy: branch-range overflow retries once
    /// with far branches; speculative rollback retries up to the configured
    /// bound, then disables speculation; a bailout falls back to an
    /// unoptimized compile. A bailout from the unoptimized compiler breaks
    /// an invariant and panics.
    fn compile_function(&mut self, f: FunctionId) -> ShakeResult<()> {
        let mut params = CompileParams {
            optimized: self.program.function(f).is_optimizable,
            ..CompileParams::default()
        };
        let mut rollbacks = 0usize;
        loop {
            match self.backend.compile(self.program, f, &params) {
                Ok(code) => {
                    self.program.attach_code(f, code);
                    self.stats.functions_compiled += 1;
                    return Ok(());
                }
                Err(CompileError::BranchRangeOverflow { function }) => {
                    if params.use_far_branches {
                        return Err(ShakeError::Compile(CompileError::Fatal {
                            function,
                            message: "branch range overflow with far branches enabled"
                                .to_string(),
                        }));
                    }
                    params.use_far_branches = true;
                }
                Err(CompileError::SpeculativeRollback { function }) => {
                    if !params.speculative_inlining {
                        return Err(ShakeError::Compile(CompileError::Fatal {
                            function,
                            message: "speculative rollback with speculative inlining disabled"
                                .to_string(),
                        }));
                    }
                    rollbacks += 1;
                    if rollbacks > self.config.max_speculative_inlining_attempts {
                        params.speculative_inlining = false;
                    }
                }
                Err(CompileError::Bailout { .. }) => {
                    if !params.optimized {
                        panic!(
                            "bailout while compiling unoptimized code: {}",
                            self.program.qualified_name(f)
                        );
                    }
                    params.optimized = false;
                }
                Err(err @ CompileError::Fatal { .. }) => return Err(err.into()),
            }
            self.stats.compile_retries += 1;
        }
    }

    /// Scan a compiled function's static-call table and object pool for
    /// newly reachable entities.
    fn add_callees_of(&mut self, f: FunctionId) {
        let code = match &self.program.function(f).code {
            Some(code) => code.clone(),
            None => return,
        };
        for entry in code.static_calls {
            match entry {
                StaticCallEntry::CallViaStub { target }
                | StaticCallEntry::Direct { target, .. } => self.add_function(target),
                StaticCallEntry::AllocStub { class } => self.add_instantiated_class(class),
            }
        }
        for entry in code.pool {
            self.add_pool_entry(entry);
        }
    }

    fn add_pool_entry(&mut self, entry: PoolEntry) {
        match entry {
            PoolEntry::UnlinkedCall(id) => {
                let call = self.program.unlinked_call(id);
                self.add_selector(call.selector);
                // The receiver may be a closure; the shared closure class
                // needs a dispatcher for this argument shape.
                if call.selector == self.program.selectors.call() {
                    self.add_closure_call(call.shape);
                }
            }
            PoolEntry::Field(fid) => self.add_field(fid),
            PoolEntry::Const(cid) => self.add_const(cid),
            PoolEntry::Function(fid) => self.add_function(fid),
            PoolEntry::AllocStub(cid) => self.add_instantiated_class(cid),
        }
    }

    // -----------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------

    pub(super) fn add_function(&mut self, f: FunctionId) {
        if self.enqueued.insert(f) {
            self.pending.push(f);
            self.changed = true;
        }
    }

    pub(super) fn is_reached(&self, f: FunctionId) -> bool {
        self.enqueued.contains(&f)
    }

    pub(super) fn add_selector(&mut self, selector: Selector) {
        if self.sent_selectors.insert(selector) {
            // Matching against instantiated classes happens in the dynamic
            // phase of the next round.
            self.changed = true;
            log::debug!(
                "selector {} is now sent",
                self.program.selectors.name(selector)
            );
        }
    }

    pub(super) fn is_sent(&self, selector: Selector) -> bool {
        self.sent_selectors.contains(&selector)
    }

    /// Mark a class instantiated, along with its whole superclass chain.
    pub(super) fn add_instantiated_class(&mut self, class: ClassId) {
        let mut current = Some(class);
        while let Some(cid) = current {
            if !self.program.mark_instantiated(cid) {
                return;
            }
            self.instantiated.insert(cid);
            self.changed = true;
            log::debug!("class {} is now instantiated", self.program.class(cid).name);
            current = self.program.superclass_of(cid);
        }
    }

    pub(super) fn add_field(&mut self, field: FieldId) {
        if !self.seen_fields.insert(field) {
            return;
        }
        self.changed = true;
        let (is_static, has_initializer, static_value) = {
            let f = self.program.field(field);
            (f.is_static, f.has_initializer, f.static_value)
        };
        if is_static {
            if let Some(value) = static_value {
                self.add_const(value);
            } else if has_initializer {
                let init = self.program.ensure_field_initializer(field);
                self.add_function(init);
            }
        }
    }

    /// A constant observed during reachability keeps its class instantiable,
    /// its embedded closures callable, and (when canonical) its whole object
    /// graph retained. Non-canonical instances are argument descriptors and
    /// the like; their class is kept but their structure is not traced.
    pub(super) fn add_const(&mut self, constant: ConstId) {
        if !self.seen_consts.insert(constant) {
            return;
        }
        let (class, type_args, fields, canonical) = {
            let c = self.program.constant(constant);
            (c.class, c.type_args, c.fields.clone(), c.canonical)
        };
        self.add_instantiated_class(class);
        if !canonical {
            return;
        }
        self.consts_to_retain.insert(constant);
        if let Some(args) = type_args {
            self.add_type_arguments(args);
        }
        for value in fields {
            match value {
                ConstValue::Object(inner) => self.add_const(inner),
                ConstValue::Closure(f) => {
                    self.add_function(f);
                    let closure_class = self.program.closure_class();
                    self.add_instantiated_class(closure_class);
                }
                ConstValue::Type(ty) => self.add_type(ty),
                ConstValue::TypeArgs(args) => self.add_type_arguments(args),
                _ => {}
            }
        }
    }

    pub(super) fn field_is_reached(&self, field: FieldId) -> bool {
        self.seen_fields.contains(&field)
    }
}
