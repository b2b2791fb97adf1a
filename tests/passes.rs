//! Module-level rewrite pipeline: storage sharing followed by renaming.

mod common;

use common::init_logs;
use lyre::ir::printer::render;
use lyre::prelude::*;

/// fn(x, b):
///   let s = alloc_storage(size=64);
///   let t = add(s, x);     // t may_share b
///   let u = relu(t);
///   u
fn sharing_module(arena: &mut Arena) -> Module {
    let x = arena.fresh_var("x");
    let b = arena.fresh_var("b");
    let s = arena.fresh_var("s");
    let t = arena.fresh_var_may_share("t", b);
    let u = arena.fresh_var("u");

    let alloc = arena.call(
        "alloc_storage",
        vec![],
        Attrs::new().set("size", AttrValue::Int(64)),
    );
    let se = arena.var(s);
    let xe = arena.var(x);
    let add = arena.call("add", vec![se, xe], Attrs::new());
    let te = arena.var(t);
    let relu = arena.call("relu", vec![te], Attrs::new());
    let ue = arena.var(u);

    let l3 = arena.let_(u, relu, ue);
    let l2 = arena.let_(t, add, l3);
    let l1 = arena.let_(s, alloc, l2);
    let func = arena.function(vec![x, b], l1);

    let mut module = Module::new();
    module.insert("main", func);
    module
}

#[test]
fn test_inplace_then_rename_pipeline() {
    init_logs();
    let mut arena = Arena::new();
    let module = sharing_module(&mut arena);

    let shared = inplace_update(&mut arena, &module).unwrap();
    let renamed = rename_vars(&mut arena, &shared).unwrap();

    let main = renamed.get("main").unwrap();
    assert_eq!(
        render(&arena, main),
        "fn(%x, %b) { let %a1 = relu(%b); %a1 }"
    );
}

#[test]
fn test_input_module_survives_the_pass() {
    init_logs();
    let mut arena = Arena::new();
    let module = sharing_module(&mut arena);
    let before = render(&arena, module.get("main").unwrap());

    let _ = inplace_update(&mut arena, &module).unwrap();

    // The arena only interns new nodes; the original module still renders.
    assert_eq!(render(&arena, module.get("main").unwrap()), before);
}

#[test]
fn test_pass_without_annotations_is_identity() {
    init_logs();
    let mut arena = Arena::new();

    let x = arena.fresh_var("x");
    let y = arena.fresh_var("y");
    let xe = arena.var(x);
    let relu = arena.call("relu", vec![xe], Attrs::new());
    let ye = arena.var(y);
    let body = arena.let_(y, relu, ye);
    let func = arena.function(vec![x], body);
    let mut module = Module::new();
    module.insert("main", func);

    let out = inplace_update(&mut arena, &module).unwrap();
    // Hash-consing means "unchanged" is id equality, not just isomorphism.
    assert_eq!(out.get("main").unwrap(), func);
}

#[test]
fn test_renaming_differentiated_function_is_canonical() {
    init_logs();
    let registry = OpRegistry::with_builtins();
    let mut arena = Arena::new();

    let a = arena.fresh_var("a");
    let y = arena.fresh_var("y");
    let ae = arena.var(a);
    let relu = arena.call("relu", vec![ae], Attrs::new());
    let ye = arena.var(y);
    let body = arena.let_(y, relu, ye);
    let func = arena.function(vec![a], body);

    let grad_fn = gradient(&mut arena, &registry, func).unwrap();
    let mut module = Module::new();
    module.insert("main_grad", grad_fn);
    let renamed = rename_vars(&mut arena, &module).unwrap();

    let main = renamed.get("main_grad").unwrap();
    let text = render(&arena, main);
    // Internal names are canonical; the tape's g-names are gone.
    assert!(!text.contains("%g"), "non-canonical names in {text}");
    assert!(text.contains("%a1"), "missing canonical names in {text}");
}

#[test]
fn test_duplicate_binding_is_rejected_by_rename() {
    init_logs();
    let mut arena = Arena::new();

    let x = arena.fresh_var("x");
    let v = arena.fresh_var("v");
    let xe = arena.var(x);
    let relu = arena.call("relu", vec![xe], Attrs::new());
    let ve = arena.var(v);
    let inner = arena.let_(v, relu, ve);
    let outer = arena.let_(v, relu, inner);
    let func = arena.function(vec![x], outer);
    let mut module = Module::new();
    module.insert("main", func);

    let err = rename_vars(&mut arena, &module).unwrap_err();
    assert!(matches!(err, Error::MalformedIr { .. }));
}
