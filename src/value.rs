//! Tagged dynamic values and objects (spec §3, §4.7, §9).
//!
//! Spec §9 allows either "objects live in the permanent arena, reclaimed at
//! teardown" or a tracing collector. This crate takes a third, idiomatic
//! option: `Rc<RefCell<Object>>` shared handles. Single-threaded cooperative
//! scheduling (§5: "there is no parallelism") makes `Rc`/`RefCell` a safe
//! stand-in for the arena-pointer-plus-manual-liveness discipline the source
//! uses — reference counting instead of tracing, no `unsafe`, same "lives
//! until nothing roots it" observable behavior.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::opcode::CompiledFunction;

pub type ObjectRef = Rc<RefCell<Object>>;
/// A frame's local slots, boxed so a `waittill` reference can outlive the
/// borrow that created it and keep resolving into the same storage even
/// after the frame moves on the thread's call stack (spec §4.6: references
/// must "point to live storage ... of the suspended frame").
pub type Locals = Rc<RefCell<Vec<Value>>>;

#[derive(Clone)]
pub enum FunctionValue {
    /// A user-defined function; carries its own compiled body so calling it
    /// doesn't require a second name lookup.
    Script(Rc<CompiledFunction>),
    /// A host-registered native callback, identified by its interned name.
    Native(i32),
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionValue::Script(c) => write!(f, "Script({})", c.name),
            FunctionValue::Native(id) => write!(f, "Native({id})"),
        }
    }
}

/// An lvalue pointer, as used by `waittill(name, &a, &b)` (spec §3, §4.6).
#[derive(Clone)]
pub enum Reference {
    Local(Locals, u16),
    Field(ObjectRef, i32),
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Local(_, slot) => write!(f, "Reference::Local(slot={slot})"),
            Reference::Field(_, id) => write!(f, "Reference::Field(field={id})"),
        }
    }
}

impl Reference {
    pub fn get(&self) -> Value {
        match self {
            Reference::Local(locals, slot) => locals.borrow().get(*slot as usize).cloned().unwrap_or(Value::Undefined),
            Reference::Field(obj, field) => obj.borrow().get_field(*field),
        }
    }

    pub fn set(&self, value: Value) {
        match self {
            Reference::Local(locals, slot) => {
                let mut locals = locals.borrow_mut();
                if (*slot as usize) >= locals.len() {
                    locals.resize(*slot as usize + 1, Value::Undefined);
                }
                locals[*slot as usize] = value;
            }
            Reference::Field(obj, field) => obj.borrow_mut().set_field(*field, value),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DebugInfo {
    pub file: i32,
    pub function: i32,
    pub line: u32,
}

/// Spec §3 "Object": field map, optional proxy fallback, optional tag,
/// optional host handle, optional debug info.
#[derive(Default)]
pub struct Object {
    fields: HashMap<i32, Value>,
    pub proxy: Option<ObjectRef>,
    pub tag: Option<String>,
    pub host_handle: Option<Rc<dyn Any>>,
    pub debug: Option<DebugInfo>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("fields", &self.fields)
            .field("proxy", &self.proxy)
            .field("tag", &self.tag)
            .field("host_handle", &self.host_handle.as_ref().map(|_| "<host_handle>"))
            .field("debug", &self.debug)
            .finish()
    }
}

impl Object {
    pub fn new() -> Self {
        Object::default()
    }

    /// Reading a non-existent field yields `undefined` (spec §4.3).
    pub fn get_field(&self, id: i32) -> Value {
        self.fields.get(&id).cloned().unwrap_or(Value::Undefined)
    }

    /// Assignment to a non-existent field creates it (spec §4.3).
    pub fn set_field(&mut self, id: i32, value: Value) {
        self.fields.insert(id, value);
    }

    /// Method resolution (spec §4.7): look up in `self`'s fields, then
    /// recurse into the proxy chain. Bounded by the proxy chain length (the
    /// source's chain is typically length 1; this guards against an
    /// accidental proxy cycle corrupting an embedder's script).
    pub fn resolve_method(this: &ObjectRef, name: i32) -> Option<Value> {
        let mut current = this.clone();
        let mut guard = 0;
        loop {
            let found = current.borrow().fields.get(&name).cloned();
            if let Some(v) = found {
                return Some(v);
            }
            let next = current.borrow().proxy.clone();
            match next {
                Some(p) => current = p,
                None => return None,
            }
            guard += 1;
            if guard > 64 {
                return None;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Vec3(f32, f32, f32),
    String(i32),
    Object(ObjectRef),
    Function(FunctionValue),
    Reference(Reference),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Vec3(..) => "vec3",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Reference(_) => "reference",
        }
    }

    /// GSC truthiness: `undefined`, `false`, `0`, and `0.0` are falsy;
    /// everything else (including objects, strings, and non-zero numbers)
    /// is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_round_trips_through_object() {
        let obj = Rc::new(RefCell::new(Object::new()));
        obj.borrow_mut().set_field(3, Value::Int(42));
        assert!(matches!(obj.borrow().get_field(3), Value::Int(42)));
        assert!(matches!(obj.borrow().get_field(99), Value::Undefined));
    }

    #[test]
    fn proxy_chain_falls_back_on_miss() {
        let proxy = Rc::new(RefCell::new(Object::new()));
        proxy.borrow_mut().set_field(7, Value::Int(1));
        let obj = Rc::new(RefCell::new(Object::new()));
        obj.borrow_mut().proxy = Some(proxy);
        assert!(matches!(Object::resolve_method(&obj, 7), Some(Value::Int(1))));
        assert!(Object::resolve_method(&obj, 8).is_none());
    }

    #[test]
    fn local_reference_writes_through_to_frame_slots() {
        let locals: Locals = Rc::new(RefCell::new(vec![Value::Undefined, Value::Undefined]));
        let r = Reference::Local(locals.clone(), 1);
        r.set(Value::Int(42));
        assert!(matches!(locals.borrow()[1], Value::Int(42)));
        assert!(matches!(r.get(), Value::Int(42)));
    }

    #[test]
    fn truthiness_matches_gsc_rules() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(1).truthy());
        assert!(Value::Float(0.0).truthy() == false);
        assert!(Value::Bool(true).truthy());
    }
}
