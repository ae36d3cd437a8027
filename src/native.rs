//! Native C-function registration (spec §6) and the default object proxy
//! (spec §4.7).
//!
//! Host natives are opaque to the engine beyond "pops `nargs` values, may
//! push one result, may set an error" (spec §5: "a native C-function ...
//! may push/pop values from the operand stack and set an error"). The four
//! built-in proxy methods need more than stack access — `notify` walks
//! every thread in the context — so they're resolved to a reserved set of
//! name ids the engine recognizes before falling back to the host registry.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::error::GscResult;
use crate::evaluation_stack::EvaluationStack;
use crate::strtab::StringTable;
use crate::value::{FunctionValue, Object, ObjectRef, Value};

pub type NativeFn = Rc<dyn Fn(&mut EvaluationStack, u16) -> GscResult<()>>;

/// Interned ids of the four engine-recognized builtin proxy methods.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinIds {
    pub waittill: i32,
    pub endon: i32,
    pub notify: i32,
    pub waittillmatch: i32,
}

impl BuiltinIds {
    pub fn intern(strtab: &mut StringTable) -> Self {
        BuiltinIds {
            waittill: strtab.intern("waittill"),
            endon: strtab.intern("endon"),
            notify: strtab.intern("notify"),
            waittillmatch: strtab.intern("waittillmatch"),
        }
    }

    pub fn is_builtin(&self, name_id: i32) -> bool {
        name_id == self.waittill || name_id == self.endon || name_id == self.notify || name_id == self.waittillmatch
    }
}

/// Builds the synthetic proxy object carrying `waittill`, `endon`,
/// `notify`, and `waittillmatch` directly as fields (spec §4.7), shared by
/// `level`, `anim`, and `game`.
///
/// The source implementation nests these behind an intermediate `__call`
/// object; spec §9 explicitly replaces that convention with the plain
/// field-then-proxy walk already implemented by
/// [`Object::resolve_method`][crate::value::Object::resolve_method], so the
/// methods live straight on the proxy instead.
pub fn create_default_proxy(_strtab: &mut StringTable, ids: &BuiltinIds) -> ObjectRef {
    let proxy = Rc::new(RefCell::new(Object::new()));
    {
        let mut p = proxy.borrow_mut();
        p.set_field(ids.waittill, Value::Function(FunctionValue::Native(ids.waittill)));
        p.set_field(ids.endon, Value::Function(FunctionValue::Native(ids.endon)));
        p.set_field(ids.notify, Value::Function(FunctionValue::Native(ids.notify)));
        p.set_field(ids.waittillmatch, Value::Function(FunctionValue::Native(ids.waittillmatch)));
    }
    proxy
}

#[derive(Default)]
pub struct NativeRegistry {
    by_name: HashMap<i32, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    pub fn register(&mut self, name_id: i32, f: NativeFn) {
        self.by_name.insert(name_id, f);
    }

    pub fn get(&self, name_id: i32) -> Option<NativeFn> {
        self.by_name.get(&name_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_proxy_exposes_four_methods_directly() {
        let mut strtab = StringTable::new();
        let ids = BuiltinIds::intern(&mut strtab);
        let proxy = create_default_proxy(&mut strtab, &ids);
        assert!(matches!(proxy.borrow().get_field(ids.waittill), Value::Function(_)));
        assert!(matches!(proxy.borrow().get_field(ids.notify), Value::Function(_)));
        assert!(matches!(proxy.borrow().get_field(ids.endon), Value::Function(_)));
        assert!(matches!(proxy.borrow().get_field(ids.waittillmatch), Value::Function(_)));
    }

    #[test]
    fn resolve_method_finds_builtins_through_proxy() {
        let mut strtab = StringTable::new();
        let ids = BuiltinIds::intern(&mut strtab);
        let proxy = create_default_proxy(&mut strtab, &ids);
        let level = Rc::new(RefCell::new(Object::new()));
        level.borrow_mut().proxy = Some(proxy);
        assert!(Object::resolve_method(&level, ids.waittill).is_some());
    }

    #[test]
    fn host_native_round_trips_through_registry() {
        let mut reg = NativeRegistry::new();
        reg.register(5, Rc::new(|stack: &mut EvaluationStack, _nargs| {
            stack.push(Value::Int(7));
            Ok(())
        }));
        let f = reg.get(5).unwrap();
        let mut stack = EvaluationStack::new();
        f(&mut stack, 0).unwrap();
        assert!(matches!(stack.pop().unwrap(), Value::Int(7)));
    }
}
