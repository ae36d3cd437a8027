//! Targeted checks for the numbered scheduler/notify invariants, each
//! driven through `Context` the same way an embedder would.

use gsc_vm::context::{CompileFlags, Context, ContextOptions};
use gsc_vm::value::Value;

fn new_context() -> Context {
    Context::create(ContextOptions::default())
}

/// Property 2: a call that returns a value leaves the caller's field set to
/// that value; a call that falls off the end without `return` leaves the
/// field `undefined` rather than some stale leftover.
#[test]
fn a_function_without_return_yields_undefined() {
    let mut ctx = new_context();
    ctx.compile_source("main", "noop(){ a=1; } main(){ level.x = noop(); }", CompileFlags::empty()).unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();
    ctx.update(0.0).unwrap();

    let level = ctx.global_root("level").unwrap();
    assert!(matches!(ctx.get_field(&level, "x"), Value::Undefined));
}

/// Property 4: scheduler fairness — N always-runnable threads each get at
/// least one resumption within a single tick (each increments its own
/// counter field by one and then re-waits a full frame, so one tick must
/// advance every counter exactly once).
#[test]
fn every_always_runnable_thread_advances_once_per_tick() {
    let mut ctx = new_context();
    ctx.compile_source(
        "main",
        r#"
        counter(n){ level.c0 = level.c0 + n; waittillframeend; }
        main(){
            level.c0 = 0;
            thread counter(1);
            thread counter(1);
            thread counter(1);
        }
        "#,
        CompileFlags::empty(),
    )
    .unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();

    ctx.update(0.0).unwrap();

    let level = ctx.global_root("level").unwrap();
    assert!(matches!(ctx.get_field(&level, "c0"), Value::Int(3)));
}

/// Property 5: multiple waiters on the same `(object, name)` are woken in
/// the order they began waiting — first-to-`waittill` gets the first slot
/// filled, and so on.
#[test]
fn notify_wakes_waiters_in_suspension_order() {
    let mut ctx = new_context();
    ctx.compile_source(
        "main",
        r#"
        waiter(n){ self waittill("go", v); level.order[n] = v; }
        main(){
            level.order = spawnstruct();
            level thread waiter(0);
            level thread waiter(1);
            level thread waiter(2);
            wait 0.05;
            level notify("go", 99);
        }
        "#,
        CompileFlags::empty(),
    )
    .unwrap();
    ctx.link();
    ctx.spawn("main", "main", None, vec![]).unwrap();

    ctx.update(0.05).unwrap();
    ctx.update(0.05).unwrap();

    let level = ctx.global_root("level").unwrap();
    let order = match ctx.get_field(&level, "order") {
        Value::Object(o) => o,
        other => panic!("expected order to be an object, got {other:?}"),
    };
    for n in 0..3 {
        assert!(matches!(ctx.get_field(&order, &n.to_string()), Value::Int(99)), "waiter {n} was not delivered the value");
    }
}
