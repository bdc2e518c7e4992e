//! The mutable program model.
//!
//! This is the graph the tree shaker analyzes and then destructively prunes:
//! libraries holding symbol dictionaries, a global class table, function and
//! field arenas, canonicalized types / type-argument vectors / constants, and
//! the selector interner. A loader (external to this crate) populates the
//! model through the builder methods; the shaker mutates it through the
//! pruning helpers.
//!
//! Entities are addressed by typed arena ids. Classes and libraries live in
//! tables with removable slots because pruning physically unregisters them;
//! functions and fields are never removed from their arenas, only unlinked
//! from every aggregate that referenced them.

pub mod code;
pub mod heap;
pub mod interner;
pub mod types;

use std::collections::HashMap;

pub use code::{
    ArgsShape, CodeAddr, CompiledCode, PoolEntry, StaticCallEntry, UnlinkedCall, UnlinkedCallId,
};
pub use heap::Heap;
pub use interner::{Selector, SelectorTable, DYN_PREFIX, GETTER_PREFIX, SETTER_PREFIX};
pub use types::{
    hash_of, round_up_to_power_of_two, AbstractType, CanonicalTable, ConstId, ConstValue,
    Constant, TypeArguments, TypeArgsId, TypeId, TypeKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Entry-point annotation supplied by the embedder's root-discovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryPoint {
    Always,
    GetterOnly,
    SetterOnly,
    CallOnly,
    #[default]
    Never,
}

/// What kind of callable a function is. Synthesized kinds are produced by
/// the dispatch resolver on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Regular,
    /// Generative constructor; eagerly precompiled before the worklist runs.
    Constructor,
    Getter,
    Setter,
    ImplicitGetter,
    ImplicitSetter,
    ImplicitStaticGetter,
    /// Tear-off form of a regular method.
    ImplicitClosure,
    /// Getter returning the tear-off closure of a method.
    MethodExtractor,
    /// Dispatcher synthesized for invoking a callable-typed field.
    InvokeFieldDispatcher,
    /// Forwarder for dynamically-typed invocations of a member.
    DynamicInvocationForwarder,
    /// A local closure function.
    Closure,
    /// Lazily compiled static field initializer.
    FieldInitializer,
}

/// One resolvable entry of a library's symbol dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictEntry {
    Class(ClassId),
    Function(FunctionId),
    Field(FieldId),
}

#[derive(Debug)]
pub struct Library {
    pub name: String,
    /// Core libraries are referenced by the runtime and never dropped.
    pub is_core: bool,
    /// Symbol dictionary; pruning nulls out slots before rehashing.
    pub dictionary: Vec<Option<DictEntry>>,
    /// Snapshot index; -1 analog is `None` once dropped.
    pub index: Option<usize>,
    pub toplevel_class: ClassId,
    pub caches_dropped: bool,
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub library: LibraryId,
    pub supertype: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub type_params: Option<TypeArgsId>,
    pub functions: Vec<FunctionId>,
    pub fields: Vec<FieldId>,
    /// Canonical constant pool of this class.
    pub constants: Vec<ConstId>,
    /// Set at most once; marking also finalizes the layout and marks the
    /// superclass.
    pub is_instantiated: bool,
    pub layout_finalized: bool,
    pub is_abstract: bool,
    /// Enum-like classes keep live value instances and are never dropped.
    pub is_enum: bool,
    pub is_toplevel: bool,
    /// Maintained for class-hierarchy analysis; cleared by the retention
    /// tracer once CHA is no longer needed.
    pub direct_subclasses: Vec<ClassId>,
    pub entry_point: EntryPoint,
    dispatchers: HashMap<(Selector, ArgsShape), FunctionId>,
}

impl Class {
    /// Drop dispatcher-table entries whose function does not satisfy `keep`.
    pub fn retain_dispatchers(&mut self, keep: impl Fn(FunctionId) -> bool) {
        self.dispatchers.retain(|_, f| keep(*f));
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: Selector,
    pub owner: ClassId,
    pub kind: FunctionKind,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_optimizable: bool,
    pub param_types: Vec<TypeId>,
    pub result_type: TypeId,
    pub code: Option<CompiledCode>,
    /// Enclosing function for closures; the original method for implicit
    /// closures.
    pub parent: Option<FunctionId>,
    /// The field an accessor or initializer was synthesized from.
    pub accessor_field: Option<FieldId>,
    pub implicit_closure: Option<FunctionId>,
    pub method_extractor: Option<FunctionId>,
    pub forwarder: Option<FunctionId>,
    /// Metadata: the member is torn off somewhere in the program.
    pub has_tearoff_uses: bool,
    /// Metadata: the member accepts dynamically-typed invocations.
    pub has_dynamic_invocations: bool,
    pub entry_point: EntryPoint,
}

#[derive(Debug)]
pub struct Field {
    pub name: Selector,
    pub owner: ClassId,
    pub is_static: bool,
    pub declared_type: TypeId,
    pub has_initializer: bool,
    /// Compiled lazily the first time the field is retained.
    pub initializer: Option<FunctionId>,
    pub static_value: Option<ConstId>,
    pub has_dynamic_invocations: bool,
    pub entry_point: EntryPoint,
}

/// The whole-program model.
#[derive(Debug)]
pub struct Program {
    libraries: Vec<Option<Library>>,
    classes: Vec<Option<Class>>,
    functions: Vec<Function>,
    fields: Vec<Field>,
    abstract_types: Vec<AbstractType>,
    type_args: Vec<TypeArguments>,
    constants: Vec<Constant>,
    unlinked_calls: Vec<UnlinkedCall>,
    canonical_types: CanonicalTable,
    canonical_type_args: CanonicalTable,
    pub selectors: SelectorTable,
    pub heap: Heap,
    /// Entries of the shared (global) object pool.
    pub global_pool: Vec<PoolEntry>,
    /// All local closure functions, like the object store's closure list.
    pub closure_functions: Vec<FunctionId>,
    root_library: Option<LibraryId>,
    core_library: LibraryId,
    closure_class: ClassId,
    dynamic_type: TypeId,
    compilation_allowed: bool,
    next_code_addr: u32,
    /// Kept when `main` is only re-exported from the root library.
    pub retain_root_library_caches: bool,
    /// Dynamic selectors with exactly one possible target.
    pub unique_dynamic_targets: HashMap<Selector, FunctionId>,
    pub get_runtime_type_is_unique: bool,
}

impl Program {
    pub fn new() -> Self {
        let mut program = Program {
            libraries: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
            abstract_types: Vec::new(),
            type_args: Vec::new(),
            constants: Vec::new(),
            unlinked_calls: Vec::new(),
            canonical_types: CanonicalTable::new(),
            canonical_type_args: CanonicalTable::new(),
            selectors: SelectorTable::new(),
            heap: Heap::new(),
            global_pool: Vec::new(),
            closure_functions: Vec::new(),
            root_library: None,
            core_library: LibraryId(0),
            closure_class: ClassId(0),
            dynamic_type: TypeId(0),
            compilation_allowed: true,
            next_code_addr: 0,
            retain_root_library_caches: false,
            unique_dynamic_targets: HashMap::new(),
            get_runtime_type_is_unique: false,
        };
        program.dynamic_type = program.intern_type(TypeKind::Dynamic);
        program.core_library = program.add_library_internal("core", true);
        program.closure_class = program.add_class(program.core_library, "_Closure");
        program
    }

    // ---------------------------------------------------------------------
    // Builder API (used by the loader and by tests)
    // ---------------------------------------------------------------------

    /// Add a library. The first non-core library becomes the root library
    /// unless `set_root_library` overrides it.
    pub fn add_library(&mut self, name: &str) -> LibraryId {
        let lib = self.add_library_internal(name, false);
        if self.root_library.is_none() {
            self.root_library = Some(lib);
        }
        lib
    }

    pub fn add_core_library(&mut self, name: &str) -> LibraryId {
        self.add_library_internal(name, true)
    }

    fn add_library_internal(&mut self, name: &str, is_core: bool) -> LibraryId {
        let id = LibraryId(self.libraries.len() as u32);
        // Reserve the library slot first: the toplevel class points back.
        self.libraries.push(None);
        let toplevel = self.push_class(Class {
            name: format!("{}::", name),
            library: id,
            supertype: None,
            interfaces: Vec::new(),
            type_params: None,
            functions: Vec::new(),
            fields: Vec::new(),
            constants: Vec::new(),
            is_instantiated: false,
            layout_finalized: false,
            is_abstract: true,
            is_enum: false,
            is_toplevel: true,
            direct_subclasses: Vec::new(),
            entry_point: EntryPoint::Never,
            dispatchers: HashMap::new(),
        });
        self.libraries[id.0 as usize] = Some(Library {
            name: name.to_string(),
            is_core,
            dictionary: Vec::new(),
            index: Some(id.0 as usize),
            toplevel_class: toplevel,
            caches_dropped: false,
        });
        id
    }

    pub fn set_root_library(&mut self, lib: LibraryId) {
        self.root_library = Some(lib);
    }

    pub fn add_class(&mut self, library: LibraryId, name: &str) -> ClassId {
        let id = self.push_class(Class {
            name: name.to_string(),
            library,
            supertype: None,
            interfaces: Vec::new(),
            type_params: None,
            functions: Vec::new(),
            fields: Vec::new(),
            constants: Vec::new(),
            is_instantiated: false,
            layout_finalized: false,
            is_abstract: false,
            is_enum: false,
            is_toplevel: false,
            direct_subclasses: Vec::new(),
            entry_point: EntryPoint::Never,
            dispatchers: HashMap::new(),
        });
        self.library_mut(library).dictionary.push(Some(DictEntry::Class(id)));
        id
    }

    fn push_class(&mut self, class: Class) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Some(class));
        id
    }

    /// Set the superclass, creating the canonical interface type for it and
    /// registering the subclass edge used by CHA.
    pub fn set_supertype(&mut self, class: ClassId, superclass: ClassId) {
        let ty = self.intern_type(TypeKind::Interface {
            class: superclass,
            args: None,
        });
        self.class_mut(class).supertype = Some(ty);
        self.class_mut(superclass).direct_subclasses.push(class);
    }

    pub fn add_interface(&mut self, class: ClassId, interface: TypeId) {
        self.class_mut(class).interfaces.push(interface);
    }

    pub fn add_function(&mut self, owner: ClassId, name: &str, kind: FunctionKind) -> FunctionId {
        let selector = self.selectors.intern(name);
        self.add_function_with_selector(owner, selector, kind)
    }

    fn add_function_with_selector(
        &mut self,
        owner: ClassId,
        name: Selector,
        kind: FunctionKind,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Function {
            name,
            owner,
            kind,
            is_static: false,
            is_abstract: false,
            is_optimizable: true,
            param_types: Vec::new(),
            result_type: self.dynamic_type,
            code: None,
            parent: None,
            accessor_field: None,
            implicit_closure: None,
            method_extractor: None,
            forwarder: None,
            has_tearoff_uses: false,
            has_dynamic_invocations: false,
            entry_point: EntryPoint::Never,
        });
        self.class_mut(owner).functions.push(id);
        id
    }

    /// Add a top-level function to a library (a member of its toplevel
    /// class, with a dictionary entry).
    pub fn add_toplevel_function(
        &mut self,
        library: LibraryId,
        name: &str,
        kind: FunctionKind,
    ) -> FunctionId {
        let owner = self.library(library).toplevel_class;
        let id = self.add_function(owner, name, kind);
        self.function_mut(id).is_static = true;
        self.library_mut(library)
            .dictionary
            .push(Some(DictEntry::Function(id)));
        id
    }

    /// Register a local closure function nested in `parent`.
    pub fn add_closure_function(&mut self, parent: FunctionId, name: &str) -> FunctionId {
        let owner = self.function(parent).owner;
        let id = self.add_function(owner, name, FunctionKind::Closure);
        self.function_mut(id).parent = Some(parent);
        // Closures are members of the closure list, not of their owner's
        // member list.
        let owner_class = self.class_mut(owner);
        owner_class.functions.retain(|&f| f != id);
        self.closure_functions.push(id);
        id
    }

    pub fn add_field(
        &mut self,
        owner: ClassId,
        name: &str,
        is_static: bool,
        declared_type: TypeId,
    ) -> FieldId {
        let selector = self.selectors.intern(name);
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(Field {
            name: selector,
            owner,
            is_static,
            declared_type,
            has_initializer: false,
            initializer: None,
            static_value: None,
            has_dynamic_invocations: false,
            entry_point: EntryPoint::Never,
        });
        self.class_mut(owner).fields.push(id);
        if self.class(owner).is_toplevel {
            let lib = self.class(owner).library;
            self.library_mut(lib).dictionary.push(Some(DictEntry::Field(id)));
        }
        id
    }

    // ---------------------------------------------------------------------
    // Canonicalization
    // ---------------------------------------------------------------------

    pub fn intern_type(&mut self, kind: TypeKind) -> TypeId {
        let hash = hash_of(&kind);
        let arena = &self.abstract_types;
        if let Some(id) = self
            .canonical_types
            .find(hash, |id| arena[id as usize].kind == kind)
        {
            return TypeId(id);
        }
        let id = TypeId(self.abstract_types.len() as u32);
        self.abstract_types.push(AbstractType {
            kind,
            canonical: true,
        });
        let arena = &self.abstract_types;
        let inserted = self
            .canonical_types
            .insert(id.0, hash, |other| arena[other as usize].kind == arena[id.0 as usize].kind);
        assert!(inserted, "freshly created type already canonical");
        id
    }

    pub fn intern_type_args(&mut self, types: Vec<TypeId>) -> TypeArgsId {
        let hash = hash_of(&types);
        let arena = &self.type_args;
        if let Some(id) = self
            .canonical_type_args
            .find(hash, |id| arena[id as usize].types == types)
        {
            return TypeArgsId(id);
        }
        let id = TypeArgsId(self.type_args.len() as u32);
        self.type_args.push(TypeArguments {
            types,
            canonical: true,
        });
        let arena = &self.type_args;
        let inserted = self.canonical_type_args.insert(id.0, hash, |other| {
            arena[other as usize].types == arena[id.0 as usize].types
        });
        assert!(inserted, "freshly created type arguments already canonical");
        id
    }

    /// Add a canonical constant to its class's pool.
    pub fn add_constant(&mut self, constant: Constant) -> ConstId {
        let id = ConstId(self.constants.len() as u32);
        let class = constant.class;
        let canonical = constant.canonical;
        self.constants.push(constant);
        if canonical {
            self.class_mut(class).constants.push(id);
        }
        id
    }

    pub fn new_unlinked_call(&mut self, selector: Selector, shape: ArgsShape) -> UnlinkedCallId {
        let id = UnlinkedCallId(self.unlinked_calls.len() as u32);
        self.unlinked_calls.push(UnlinkedCall { selector, shape });
        id
    }

    // ---------------------------------------------------------------------
    // Synthesized members
    // ---------------------------------------------------------------------

    /// Tear-off closure form of a method, created on demand.
    pub fn ensure_implicit_closure(&mut self, function: FunctionId) -> FunctionId {
        if let Some(existing) = self.function(function).implicit_closure {
            return existing;
        }
        let (owner, name, is_static) = {
            let f = self.function(function);
            (f.owner, f.name, f.is_static)
        };
        let id = self.add_function_with_selector(owner, name, FunctionKind::ImplicitClosure);
        // The tear-off is not a dispatch target; keep it off the member list.
        self.class_mut(owner).functions.retain(|&f| f != id);
        self.function_mut(id).parent = Some(function);
        self.function_mut(id).is_static = is_static;
        self.function_mut(function).implicit_closure = Some(id);
        id
    }

    /// Unlink an implicit closure that never got compiled.
    pub fn drop_uncompiled_implicit_closure(&mut self, function: FunctionId) {
        if let Some(ic) = self.function(function).implicit_closure {
            if self.function(ic).code.is_none() {
                self.function_mut(function).implicit_closure = None;
            }
        }
    }

    /// Getter returning the tear-off of `function`, created on demand.
    pub fn ensure_method_extractor(
        &mut self,
        function: FunctionId,
        getter_name: Selector,
    ) -> FunctionId {
        if let Some(existing) = self.function(function).method_extractor {
            return existing;
        }
        let owner = self.function(function).owner;
        let id = self.add_function_with_selector(owner, getter_name, FunctionKind::MethodExtractor);
        self.function_mut(id).parent = Some(function);
        self.function_mut(function).method_extractor = Some(id);
        id
    }

    /// Dynamic-invocation forwarder for `function`, created on demand.
    pub fn ensure_dynamic_forwarder(
        &mut self,
        function: FunctionId,
        forwarder_name: Selector,
    ) -> FunctionId {
        if let Some(existing) = self.function(function).forwarder {
            return existing;
        }
        let owner = self.function(function).owner;
        let id = self.add_function_with_selector(
            owner,
            forwarder_name,
            FunctionKind::DynamicInvocationForwarder,
        );
        self.function_mut(id).parent = Some(function);
        self.function_mut(function).forwarder = Some(id);
        id
    }

    /// Invocation dispatcher on `class` for a selector/argument-shape pair,
    /// created on demand (one per pair per class).
    pub fn ensure_invocation_dispatcher(
        &mut self,
        class: ClassId,
        name: Selector,
        shape: ArgsShape,
    ) -> FunctionId {
        if let Some(&existing) = self.class(class).dispatchers.get(&(name, shape)) {
            return existing;
        }
        let id = self.add_function_with_selector(class, name, FunctionKind::InvokeFieldDispatcher);
        self.class_mut(class).dispatchers.insert((name, shape), id);
        id
    }

    /// Static-initializer function of a field, created on demand.
    pub fn ensure_field_initializer(&mut self, field: FieldId) -> FunctionId {
        if let Some(existing) = self.field(field).initializer {
            return existing;
        }
        let (owner, name) = {
            let f = self.field(field);
            (f.owner, f.name)
        };
        let id = self.add_function_with_selector(owner, name, FunctionKind::FieldInitializer);
        self.class_mut(owner).functions.retain(|&f| f != id);
        self.function_mut(id).is_static = true;
        self.function_mut(id).accessor_field = Some(field);
        self.field_mut(field).initializer = Some(id);
        id
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn library(&self, id: LibraryId) -> &Library {
        self.libraries[id.0 as usize]
            .as_ref()
            .expect("library was unregistered")
    }

    pub fn library_mut(&mut self, id: LibraryId) -> &mut Library {
        self.libraries[id.0 as usize]
            .as_mut()
            .expect("library was unregistered")
    }

    pub fn library_is_live(&self, id: LibraryId) -> bool {
        self.libraries[id.0 as usize].is_some()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        self.classes[id.0 as usize]
            .as_ref()
            .expect("class was unregistered")
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        self.classes[id.0 as usize]
            .as_mut()
            .expect("class was unregistered")
    }

    pub fn class_is_live(&self, id: ClassId) -> bool {
        self.classes[id.0 as usize].is_some()
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0 as usize]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0 as usize]
    }

    pub fn abstract_type(&self, id: TypeId) -> &AbstractType {
        &self.abstract_types[id.0 as usize]
    }

    pub fn abstract_type_mut(&mut self, id: TypeId) -> &mut AbstractType {
        &mut self.abstract_types[id.0 as usize]
    }

    pub fn type_arguments(&self, id: TypeArgsId) -> &TypeArguments {
        &self.type_args[id.0 as usize]
    }

    pub fn type_arguments_mut(&mut self, id: TypeArgsId) -> &mut TypeArguments {
        &mut self.type_args[id.0 as usize]
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.constants[id.0 as usize]
    }

    pub fn unlinked_call(&self, id: UnlinkedCallId) -> UnlinkedCall {
        self.unlinked_calls[id.0 as usize]
    }

    pub fn dynamic_type(&self) -> TypeId {
        self.dynamic_type
    }

    pub fn closure_class(&self) -> ClassId {
        self.closure_class
    }

    pub fn core_library(&self) -> LibraryId {
        self.core_library
    }

    pub fn root_library(&self) -> Option<LibraryId> {
        self.root_library
    }

    /// A function's name qualified by its owner, for diagnostics.
    pub fn qualified_name(&self, id: FunctionId) -> String {
        let f = self.function(id);
        format!("{}.{}", self.class(f.owner).name, self.selectors.name(f.name))
    }

    // ---------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------

    pub fn library_ids(&self) -> Vec<LibraryId> {
        (0..self.libraries.len() as u32)
            .map(LibraryId)
            .filter(|&id| self.libraries[id.0 as usize].is_some())
            .collect()
    }

    pub fn class_ids(&self) -> Vec<ClassId> {
        (0..self.classes.len() as u32)
            .map(ClassId)
            .filter(|&id| self.classes[id.0 as usize].is_some())
            .collect()
    }

    pub fn all_function_ids(&self) -> Vec<FunctionId> {
        (0..self.functions.len() as u32).map(FunctionId).collect()
    }

    pub fn all_field_ids(&self) -> Vec<FieldId> {
        (0..self.fields.len() as u32).map(FieldId).collect()
    }

    pub fn canonical_type_ids(&self) -> Vec<TypeId> {
        self.canonical_types.iter().map(TypeId).collect()
    }

    pub fn canonical_type_args_ids(&self) -> Vec<TypeArgsId> {
        self.canonical_type_args.iter().map(TypeArgsId).collect()
    }

    pub fn canonical_types_capacity(&self) -> usize {
        self.canonical_types.capacity()
    }

    pub fn canonical_type_args_capacity(&self) -> usize {
        self.canonical_type_args.capacity()
    }

    /// The superclass of a class, resolved through its supertype.
    pub fn superclass_of(&self, class: ClassId) -> Option<ClassId> {
        let ty = self.class(class).supertype?;
        match self.abstract_type(ty).kind {
            TypeKind::Interface { class, .. } => Some(class),
            _ => None,
        }
    }

    /// CHA: every concrete class in the subtree rooted at `class`,
    /// including `class` itself when concrete.
    pub fn concrete_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        let mut result = Vec::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            if !self.class_is_live(current) {
                continue;
            }
            let cls = self.class(current);
            if !cls.is_abstract {
                result.push(current);
            }
            stack.extend(cls.direct_subclasses.iter().copied());
        }
        result
    }

    /// Find `main` in the root library's toplevel class.
    pub fn lookup_main(&self) -> Option<FunctionId> {
        let root = self.root_library?;
        let main = self.selectors.lookup("main")?;
        let toplevel = self.library(root).toplevel_class;
        self.class(toplevel)
            .functions
            .iter()
            .copied()
            .find(|&f| self.function(f).name == main)
    }

    // ---------------------------------------------------------------------
    // Compilation bookkeeping
    // ---------------------------------------------------------------------

    pub fn compilation_allowed(&self) -> bool {
        self.compilation_allowed
    }

    /// Setting this false is permanent for the lifetime of the program; no
    /// code may be compiled or attached afterwards.
    pub fn set_compilation_allowed(&mut self, allowed: bool) {
        self.compilation_allowed = allowed;
    }

    pub fn allocate_code_addr(&mut self) -> CodeAddr {
        self.next_code_addr += 1;
        CodeAddr(self.next_code_addr)
    }

    pub fn attach_code(&mut self, function: FunctionId, code: CompiledCode) {
        assert!(self.compilation_allowed, "compilation is no longer allowed");
        self.function_mut(function).code = Some(code);
    }

    pub fn clear_code(&mut self, function: FunctionId) {
        self.function_mut(function).code = None;
    }

    pub fn clear_all_code(&mut self) {
        for f in &mut self.functions {
            f.code = None;
        }
    }

    /// Mark a class instantiated and finalize its layout. Returns false if
    /// it was already marked (a class is marked at most once).
    pub fn mark_instantiated(&mut self, class: ClassId) -> bool {
        let cls = self.class_mut(class);
        if cls.is_instantiated {
            return false;
        }
        cls.is_instantiated = true;
        cls.layout_finalized = true;
        true
    }

    /// Finalize every class's layout so CHA and entry-point lookup are
    /// stable before compilation starts.
    pub fn finalize_all_classes(&mut self) {
        for slot in self.classes.iter_mut().flatten() {
            slot.layout_finalized = true;
        }
    }

    // ---------------------------------------------------------------------
    // Pruning support
    // ---------------------------------------------------------------------

    pub fn unregister_class(&mut self, id: ClassId) {
        self.classes[id.0 as usize] = None;
    }

    pub fn unregister_library(&mut self, id: LibraryId) {
        self.libraries[id.0 as usize] = None;
    }

    /// Rebuild the canonical type table from the retained ids. Reinserting a
    /// structural duplicate indicates a canonicalization bug and panics.
    pub fn rebuild_canonical_types(&mut self, retained: &[TypeId]) {
        let mut table =
            CanonicalTable::with_capacity(round_up_to_power_of_two(retained.len() * 4 / 3));
        for &id in retained {
            let arena = &self.abstract_types;
            let hash = hash_of(&arena[id.0 as usize].kind);
            let inserted = table.insert(id.0, hash, |other| {
                arena[other as usize].kind == arena[id.0 as usize].kind
            });
            assert!(inserted, "duplicate canonical type during table rebuild");
        }
        self.canonical_types = table;
    }

    /// Rebuild the canonical type-arguments table from the retained ids.
    pub fn rebuild_canonical_type_args(&mut self, retained: &[TypeArgsId]) {
        let mut table =
            CanonicalTable::with_capacity(round_up_to_power_of_two(retained.len() * 4 / 3));
        for &id in retained {
            let arena = &self.type_args;
            let hash = hash_of(&arena[id.0 as usize].types);
            let inserted = table.insert(id.0, hash, |other| {
                arena[other as usize].types == arena[id.0 as usize].types
            });
            assert!(
                inserted,
                "duplicate canonical type arguments during table rebuild"
            );
        }
        self.canonical_type_args = table;
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
