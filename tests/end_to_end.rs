//! Drives `Context` through `compile_source`/`link`/`call`/`update` exactly
//! as an embedder would, asserting only on global field reads and thread
//! counts — no internal test-only hooks into `engine::Vm`.

use gsc_vm::context::{CompileFlags, Context, ContextOptions};
use gsc_vm::value::Value;

fn new_context() -> Context {
    Context::create(ContextOptions::default())
}

fn field_int(ctx: &mut Context, root: &str, field: &str) -> Option<i64> {
    let obj = ctx.global_root(root).unwrap();
    match ctx.get_field(&obj, field) {
        Value::Int(n) => Some(n),
        _ => None,
    }
}

/// Scenario 1: `main(){ a=1; b=2; level.x = a+b; }` → `level.x == 3`.
#[test]
fn arithmetic_assigned_into_a_global_field() {
    let mut ctx = new_context();
    ctx.compile_source("main", "main(){ a=1; b=2; level.x = a+b; }", CompileFlags::empty()).unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();
    ctx.update(0.0).unwrap();

    assert_eq!(field_int(&mut ctx, "level", "x"), Some(3));
}

/// Scenario 2: `main(){ wait 0.1; level.done = true; }` ticked at `dt=0.05`:
/// after two ticks `level.done` is unset; after three it is `true`.
#[test]
fn wait_suspends_until_its_deadline_has_passed() {
    let mut ctx = new_context();
    ctx.compile_source("main", "main(){ wait 0.1; level.done = true; }", CompileFlags::empty()).unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();

    ctx.update(0.05).unwrap();
    ctx.update(0.05).unwrap();
    let level = ctx.global_root("level").unwrap();
    assert!(matches!(ctx.get_field(&level, "done"), Value::Undefined));

    ctx.update(0.05).unwrap();
    assert!(matches!(ctx.get_field(&level, "done"), Value::Bool(true)));
}

/// Scenario 3: a thread `waittill`s on `level`, `main` spawns it, waits, then
/// notifies with a value → the waiter's `level.v` observes that value.
#[test]
fn waittill_receives_the_value_passed_to_notify() {
    let mut ctx = new_context();
    ctx.compile_source(
        "main",
        r#"
        a(){ self waittill("go", v); level.v = v; }
        main(){ level thread a(); wait 0.05; level notify("go", 42); }
        "#,
        CompileFlags::empty(),
    )
    .unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();

    ctx.update(0.05).unwrap();
    ctx.update(0.05).unwrap();

    assert_eq!(field_int(&mut ctx, "level", "v"), Some(42));
}

/// Scenario 4: a thread `endon`s a name, spins on `wait` forever; `main`
/// notifies that name → the spawned thread is terminated. `main` itself
/// finishes in the same tick (its body ends right after the notify call),
/// so no threads remain at all once the tick completes.
#[test]
fn endon_terminates_the_waiting_thread_on_notify() {
    let mut ctx = new_context();
    ctx.compile_source(
        "main",
        r#"
        a(){ self endon("stop"); while(1){ wait 0.1; } }
        main(){ level thread a(); wait 0.05; level notify("stop"); }
        "#,
        CompileFlags::empty(),
    )
    .unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();

    ctx.update(0.05).unwrap();
    ctx.update(0.05).unwrap();

    assert_eq!(ctx.thread_count(), 0);
}

/// Scenario 5: `f(x){ return x*x; } main(){ level.y = f(7); }` → `level.y == 49`.
#[test]
fn function_call_return_value_flows_into_a_global_field() {
    let mut ctx = new_context();
    ctx.compile_source("main", "f(x){ return x*x; } main(){ level.y = f(7); }", CompileFlags::empty()).unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();
    ctx.update(0.0).unwrap();

    assert_eq!(field_int(&mut ctx, "level", "y"), Some(49));
}

/// Scenario 6: `B` includes `A`; `A` defines `g()`. Calling `B::g` resolves
/// to `A`'s `g` when `B` doesn't define its own; once `B` defines `g()` too,
/// `B::g` resolves to `B`'s own definition instead.
#[test]
fn include_resolves_unqualified_names_unless_locally_overridden() {
    let mut ctx = new_context();
    ctx.compile_source("A", "g(){ return 1; }", CompileFlags::empty()).unwrap();
    ctx.compile_source("B", "#include A;\nmain(){ return 0; }", CompileFlags::empty()).unwrap();
    ctx.link();

    let v = ctx.call("B", "g", None, vec![]).unwrap();
    assert!(matches!(v, Value::Int(1)));

    ctx.compile_source("B", "#include A;\ng(){ return 2; }\nmain(){ return 0; }", CompileFlags::FORCE_RECOMPILE).unwrap();
    ctx.link();

    let v = ctx.call("B", "g", None, vec![]).unwrap();
    assert!(matches!(v, Value::Int(2)));
}
