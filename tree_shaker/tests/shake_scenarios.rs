//! End-to-end scenarios for the tree-shaking pass: reachability through
//! static and dynamic calls, dispatch synthesis, pruning, the post-link
//! passes, and the compile retry policy.

use std::fs;
use std::io::Write;

use tree_shaker::program::{
    ArgsShape, DictEntry, EntryPoint, FunctionKind, PoolEntry, Program, StaticCallEntry,
    TypeKind,
};
use tree_shaker::{
    shake_program, CodePlan, CompileError, ShakeConfig, ShakeError, TableBackend,
};
use tree_shaker::backend::PlannedFailure;

fn shake(
    program: &mut Program,
    backend: &mut TableBackend,
) -> tree_shaker::ShakeOutcome {
    shake_program(program, backend, &[], &ShakeConfig::default()).unwrap()
}

#[test]
fn test_static_calls_and_dead_code() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let helper = program.add_toplevel_function(app, "helper", FunctionKind::Regular);
    let dead = program.add_toplevel_function(app, "dead", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_static_calls(vec![StaticCallEntry::CallViaStub { target: helper }]),
    );
    let outcome = shake(&mut program, &mut backend);

    assert!(outcome.retained_functions.contains(&main));
    assert!(outcome.retained_functions.contains(&helper));
    assert!(!outcome.retained_functions.contains(&dead));
    assert_eq!(backend.attempts(dead), 0);
    assert!(outcome.stats.functions_dropped >= 1);

    // The bound call table became all-direct and was discarded.
    assert_eq!(outcome.stats.static_calls_bound, 1);
    let code = program.function(main).code.clone().unwrap();
    assert!(code.static_calls.is_empty());
}

#[test]
fn test_dynamic_dispatch_reaches_only_instantiated_classes() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let b = program.add_class(app, "B");
    let ping_a = program.add_function(a, "ping", FunctionKind::Regular);
    let ping_b = program.add_function(b, "ping", FunctionKind::Regular);

    let ping = program.selectors.intern("ping");
    let site = program.new_unlinked_call(ping, ArgsShape::positional(0));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let outcome = shake(&mut program, &mut backend);

    // Only the instantiated receiver's member is reached.
    assert!(outcome.retained_functions.contains(&ping_a));
    assert!(!outcome.retained_functions.contains(&ping_b));
    assert!(program.class_is_live(a));
    assert!(!program.class_is_live(b));
    assert!(program.class(a).is_instantiated);
    assert_eq!(outcome.stats.classes_dropped, 1);
}

#[test]
fn test_subclass_override_is_fully_dropped() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let m_a = program.add_function(a, "m", FunctionKind::Regular);
    let b = program.add_class(app, "B");
    program.set_supertype(b, a);
    let m_b = program.add_function(b, "m", FunctionKind::Regular);
    let b_supertype = program.class(b).supertype.unwrap();

    let m = program.selectors.intern("m");
    let site = program.new_unlinked_call(m, ArgsShape::positional(0));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let outcome = shake(&mut program, &mut backend);

    // Only the superclass's method is a dispatch target.
    assert!(outcome.retained_functions.contains(&m_a));
    assert!(!outcome.retained_functions.contains(&m_b));
    // The override's class is gone without a trace: no class table slot,
    // no CHA edge on the survivor, no canonical supertype interface type,
    // no dictionary symbol.
    assert!(!program.class_is_live(b));
    assert!(program.class(a).direct_subclasses.is_empty());
    assert!(!program.canonical_type_ids().contains(&b_supertype));
    assert!(!program.abstract_type(b_supertype).canonical);
    assert!(!program
        .library(app)
        .dictionary
        .iter()
        .flatten()
        .any(|entry| matches!(entry, DictEntry::Class(c) if *c == b)));
}

#[test]
fn test_getter_only_field_roots_only_its_getter() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let dynamic = program.dynamic_type();
    let size = program.add_field(a, "size", false, dynamic);
    program.field_mut(size).entry_point = EntryPoint::GetterOnly;
    let getter = program.add_function(a, "get:size", FunctionKind::ImplicitGetter);
    program.function_mut(getter).accessor_field = Some(size);
    let setter = program.add_function(a, "set:size", FunctionKind::ImplicitSetter);
    program.function_mut(setter).accessor_field = Some(size);

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    assert!(outcome.retained_functions.contains(&getter));
    assert!(!outcome.retained_functions.contains(&setter));
}

#[test]
fn test_setter_only_field_roots_only_its_setter() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let dynamic = program.dynamic_type();
    let size = program.add_field(a, "size", false, dynamic);
    program.field_mut(size).entry_point = EntryPoint::SetterOnly;
    let getter = program.add_function(a, "get:size", FunctionKind::ImplicitGetter);
    program.function_mut(getter).accessor_field = Some(size);
    let setter = program.add_function(a, "set:size", FunctionKind::ImplicitSetter);
    program.function_mut(setter).accessor_field = Some(size);

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    assert!(outcome.retained_functions.contains(&setter));
    assert!(!outcome.retained_functions.contains(&getter));
}

#[test]
fn test_always_entry_point_roots_the_tearoff() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let run = program.add_function(a, "run", FunctionKind::Regular);
    program.function_mut(run).entry_point = EntryPoint::Always;

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    // The embedder may both call and tear off an `Always` method.
    assert!(outcome.retained_functions.contains(&run));
    let closure = program.function(run).implicit_closure.unwrap();
    let extractor = program.function(run).method_extractor.unwrap();
    assert!(outcome.retained_functions.contains(&closure));
    assert!(outcome.retained_functions.contains(&extractor));
}

#[test]
fn test_missing_main_is_an_error() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "not_main", FunctionKind::Regular);
    let mut backend = TableBackend::new();
    let err = shake_program(&mut program, &mut backend, &[], &ShakeConfig::default())
        .unwrap_err();
    assert!(matches!(err, ShakeError::MissingMain { .. }));
}

#[test]
fn test_explicit_roots_do_not_require_main() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let entry = program.add_toplevel_function(app, "entry", FunctionKind::Regular);
    let mut backend = TableBackend::new();
    let outcome =
        shake_program(&mut program, &mut backend, &[entry], &ShakeConfig::default()).unwrap();
    assert!(outcome.retained_functions.contains(&entry));
}

#[test]
fn test_tearoff_synthesizes_closure_and_extractor() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let handler = program.add_function(a, "handler", FunctionKind::Regular);
    program.function_mut(handler).has_tearoff_uses = true;

    let getter = program.selectors.intern("get:handler");
    let site = program.new_unlinked_call(getter, ArgsShape::positional(0));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let outcome = shake(&mut program, &mut backend);

    let closure = program.function(handler).implicit_closure.unwrap();
    let extractor = program.function(handler).method_extractor.unwrap();
    assert!(outcome.retained_functions.contains(&closure));
    assert!(outcome.retained_functions.contains(&extractor));
    // The compiled tear-off keeps the method it forwards to.
    assert!(outcome.retained_functions.contains(&handler));
    assert_eq!(
        program.function(extractor).kind,
        FunctionKind::MethodExtractor
    );
}

#[test]
fn test_call_through_getter() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let getter = program.add_function(a, "get:cb", FunctionKind::Getter);

    // `cb(...)` reads the getter, then invokes the result via `call`.
    let cb = program.selectors.intern("cb");
    let site = program.new_unlinked_call(cb, ArgsShape::positional(1));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let outcome = shake(&mut program, &mut backend);
    assert!(outcome.retained_functions.contains(&getter));
}

#[test]
fn test_dynamic_invocation_forwarder() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let run = program.add_function(a, "run", FunctionKind::Regular);
    program.function_mut(run).has_dynamic_invocations = true;

    let dyn_run = program.selectors.intern("dyn:run");
    let site = program.new_unlinked_call(dyn_run, ArgsShape::positional(0));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let outcome = shake(&mut program, &mut backend);

    let forwarder = program.function(run).forwarder.unwrap();
    assert!(outcome.retained_functions.contains(&forwarder));
    assert_eq!(
        program.function(forwarder).kind,
        FunctionKind::DynamicInvocationForwarder
    );
}

#[test]
fn test_callback_field_gets_invocation_dispatchers() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let base = program.add_class(app, "Base");
    let derived = program.add_class(app, "Derived");
    program.set_supertype(derived, base);

    let dynamic = program.dynamic_type();
    let fn_type = program.intern_type(TypeKind::Function {
        params: vec![dynamic],
        result: dynamic,
    });
    program.add_field(base, "on_event", false, fn_type);

    let on_event = program.selectors.intern("on_event");
    let site = program.new_unlinked_call(on_event, ArgsShape::positional(1));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![
            PoolEntry::AllocStub(base),
            PoolEntry::UnlinkedCall(site),
        ]),
    );
    let outcome = shake(&mut program, &mut backend);

    // Both concrete classes in the hierarchy can hold the callback.
    let dispatchers: Vec<_> = outcome
        .retained_functions
        .iter()
        .filter(|&&f| program.function(f).kind == FunctionKind::InvokeFieldDispatcher)
        .collect();
    let owners: Vec<_> = dispatchers
        .iter()
        .map(|&&f| program.function(f).owner)
        .collect();
    assert!(owners.contains(&base));
    assert!(owners.contains(&derived));
}

#[test]
fn test_static_field_initializer_is_reached() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let dynamic = program.dynamic_type();
    let toplevel = program.library(app).toplevel_class;
    let counter = program.add_field(toplevel, "counter", true, dynamic);
    program.field_mut(counter).has_initializer = true;

    let mut backend = TableBackend::new();
    backend.plan(main, CodePlan::with_pool(vec![PoolEntry::Field(counter)]));
    let outcome = shake(&mut program, &mut backend);

    let init = program.field(counter).initializer.unwrap();
    assert!(outcome.retained_functions.contains(&init));
    assert_eq!(program.function(init).kind, FunctionKind::FieldInitializer);
}

#[test]
fn test_unused_library_is_dropped() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let util = program.add_library("util");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    program.add_toplevel_function(util, "unused", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    assert!(program.library_is_live(app));
    assert!(!program.library_is_live(util));
    assert_eq!(outcome.stats.libraries_dropped, 1);
}

#[test]
#[should_panic(expected = "live instances")]
fn test_dropping_class_with_live_instances_panics() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let stray = program.add_class(app, "Stray");
    program.add_function(stray, "poke", FunctionKind::Regular);
    // An instance the analysis never saw being allocated.
    program.heap.allocate(stray);

    let mut backend = TableBackend::new();
    let _ = shake_program(&mut program, &mut backend, &[], &ShakeConfig::default());
}

#[test]
fn test_bailout_falls_back_to_unoptimized() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    backend.plan(main, CodePlan::default().failing_first(PlannedFailure::Bailout));
    let outcome = shake(&mut program, &mut backend);

    assert_eq!(backend.attempts(main), 2);
    assert!(backend.compile_log[0].1.optimized);
    assert!(!backend.compile_log[1].1.optimized);
    assert_eq!(outcome.stats.compile_retries, 1);
}

#[test]
fn test_branch_overflow_retries_with_far_branches() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::default().failing_first(PlannedFailure::BranchRangeOverflow),
    );
    shake(&mut program, &mut backend);

    assert_eq!(backend.attempts(main), 2);
    assert!(!backend.compile_log[0].1.use_far_branches);
    assert!(backend.compile_log[1].1.use_far_branches);
}

#[test]
fn test_speculation_disabled_after_bounded_retries() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::default()
            .failing_first(PlannedFailure::SpeculativeRollback)
            .failing_first(PlannedFailure::SpeculativeRollback),
    );
    let config = ShakeConfig {
        max_speculative_inlining_attempts: 1,
        ..ShakeConfig::default()
    };
    shake_program(&mut program, &mut backend, &[], &config).unwrap();

    assert_eq!(backend.attempts(main), 3);
    assert!(backend.compile_log[1].1.speculative_inlining);
    assert!(!backend.compile_log[2].1.speculative_inlining);
}

#[test]
fn test_fatal_compile_error_aborts() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);

    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::default().failing_first(PlannedFailure::Fatal("no ir".to_string())),
    );
    let err = shake_program(&mut program, &mut backend, &[], &ShakeConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ShakeError::Compile(CompileError::Fatal { .. })
    ));
}

#[test]
fn test_constructors_precompile_before_the_worklist() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    let ctor = program.add_function(a, "A.", FunctionKind::Constructor);

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    // Compiled eagerly for field-guard stability, then discarded and
    // dropped with its unreached class.
    assert_eq!(backend.attempts(ctor), 1);
    assert!(backend.compile_log[0].0 == ctor);
    assert!(!outcome.retained_functions.contains(&ctor));
    assert!(program.function(ctor).code.is_none());
    let _ = main;
}

#[test]
fn test_unlinked_call_sites_are_deduplicated() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let helper = program.add_toplevel_function(app, "helper", FunctionKind::Regular);
    let a = program.add_class(app, "A");
    program.add_function(a, "ping", FunctionKind::Regular);

    let ping = program.selectors.intern("ping");
    let site1 = program.new_unlinked_call(ping, ArgsShape::positional(0));
    let site2 = program.new_unlinked_call(ping, ArgsShape::positional(0));
    let site3 = program.new_unlinked_call(ping, ArgsShape::positional(2));

    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan {
            static_calls: vec![StaticCallEntry::CallViaStub { target: helper }],
            pool: vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site1)],
            ..Default::default()
        },
    );
    backend.plan(
        helper,
        CodePlan::with_pool(vec![
            PoolEntry::UnlinkedCall(site2),
            PoolEntry::UnlinkedCall(site3),
        ]),
    );
    let outcome = shake(&mut program, &mut backend);

    // Same selector and shape share one descriptor; the different shape
    // keeps its own.
    assert_eq!(outcome.stats.unlinked_calls_deduped, 1);
    let main_pool = program.function(main).code.clone().unwrap().pool;
    let helper_pool = program.function(helper).code.clone().unwrap().pool;
    assert!(helper_pool.contains(&main_pool[1]));
    assert!(helper_pool.contains(&PoolEntry::UnlinkedCall(site3)));
}

#[test]
fn test_obfuscation_keeps_accessor_structure() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "Widget");
    let getter = program.add_function(a, "get:size", FunctionKind::Getter);
    let size_sel = program.selectors.intern("size");

    let site = program.new_unlinked_call(size_sel, ArgsShape::positional(0));
    let mut backend = TableBackend::new();
    backend.plan(
        main,
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let config = ShakeConfig {
        obfuscate: true,
        ..ShakeConfig::default()
    };
    let outcome = shake_program(&mut program, &mut backend, &[], &config).unwrap();
    let map = outcome.renames.unwrap();
    assert!(outcome.stats.symbols_renamed > 0);

    // `main` is deny-listed; the getter still pairs with its base selector.
    assert_eq!(program.selectors.name(program.selectors.lookup("main").unwrap()), "main");
    let new_base = program.selectors.name(size_sel).to_string();
    let new_getter = program.selectors.name(program.function(getter).name);
    assert_eq!(new_getter, format!("get:{}", new_base));
    assert_ne!(new_base, "size");
    assert_eq!(map.deobfuscate(&new_base), Some("size"));
    // The class name was renamed too.
    assert_ne!(program.class(a).name, "Widget");
}

#[test]
fn test_rename_map_round_trips_through_a_file() {
    let mut program = Program::new();
    let app = program.add_library("app");
    program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let a = program.add_class(app, "Widget");
    let ping = program.selectors.intern("ping");
    program.add_function(a, "ping", FunctionKind::Regular);
    let site = program.new_unlinked_call(ping, ArgsShape::positional(0));

    let mut backend = TableBackend::new();
    backend.plan(
        program.lookup_main().unwrap(),
        CodePlan::with_pool(vec![PoolEntry::AllocStub(a), PoolEntry::UnlinkedCall(site)]),
    );
    let config = ShakeConfig {
        obfuscate: true,
        obfuscation_private_key: Some("k1".to_string()),
        ..ShakeConfig::default()
    };
    let outcome = shake_program(&mut program, &mut backend, &[], &config).unwrap();
    let map = outcome.renames.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renames.json");
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(map.to_json().as_bytes()).unwrap();
    drop(file);

    let text = fs::read_to_string(&path).unwrap();
    let reloaded = tree_shaker::ObfuscationMap::from_json(&text).unwrap();
    assert_eq!(reloaded, map);
    let renamed = program.selectors.name(ping);
    assert_eq!(reloaded.deobfuscate(renamed), Some("ping"));
}

#[test]
fn test_constant_graph_retains_classes_and_closures() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    let config_cls = program.add_class(app, "Config");
    let on_load = program.add_toplevel_function(app, "on_load", FunctionKind::Regular);

    let constant = program.add_constant(tree_shaker::program::Constant {
        class: config_cls,
        type_args: None,
        fields: vec![
            tree_shaker::program::ConstValue::Str("prod".to_string()),
            tree_shaker::program::ConstValue::Closure(on_load),
        ],
        canonical: true,
    });

    let mut backend = TableBackend::new();
    backend.plan(main, CodePlan::with_pool(vec![PoolEntry::Const(constant)]));
    let outcome = shake(&mut program, &mut backend);

    // The constant keeps its class alive even with no other references.
    assert!(program.class_is_live(config_cls));
    assert!(program.class(config_cls).is_instantiated);
    assert!(program.class(config_cls).constants.contains(&constant));
    // The embedded closure is callable.
    assert!(outcome.retained_functions.contains(&on_load));
}

#[test]
fn test_canonical_type_table_shrinks_to_survivors() {
    let mut program = Program::new();
    let app = program.add_library("app");
    let main = program.add_toplevel_function(app, "main", FunctionKind::Regular);
    // Types only dead code would have needed.
    for i in 0..40 {
        let cls = program.add_class(app, &format!("Dead{}", i));
        program.intern_type(TypeKind::Interface {
            class: cls,
            args: None,
        });
    }
    let before = program.canonical_types_capacity();

    let mut backend = TableBackend::new();
    let outcome = shake(&mut program, &mut backend);

    assert!(outcome.stats.types_dropped >= 40);
    assert!(program.canonical_types_capacity() < before);
    let _ = main;
}
