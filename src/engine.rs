//! VM core + thread scheduler (spec §4.5, §5).
//!
//! The two components are specified separately but share one mutable
//! world — the dispatch loop mutates thread state the scheduler inspects,
//! and `notify` (run from inside dispatch) walks every other thread — so
//! this crate merges them into a single [`Vm`] that owns the thread table,
//! the clock, and the function/global namespaces dispatch resolves
//! against. See DESIGN.md.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{GscError, GscResult};
use crate::file::CompiledFile;
use crate::native::{BuiltinIds, NativeRegistry};
use crate::opcode::{Callee, GlobalSlot, Instruction};
use crate::strtab::StringTable;
use crate::thread::{Frame, Thread, ThreadId, ThreadState, WaittillSpec};
use crate::value::{FunctionValue, Object, ObjectRef, Reference, Value};

/// The three well-known roots plus the embedder-facing anonymous globals
/// object (spec §6: "get/set named field on the anonymous global object;
/// the well-known roots level, anim, game are pre-populated").
pub struct Globals {
    pub anonymous: ObjectRef,
    pub level: ObjectRef,
    pub anim: ObjectRef,
    pub game: ObjectRef,
}

pub struct Vm {
    pub strtab: StringTable,
    pub files: IndexMap<String, CompiledFile>,
    pub globals: Globals,
    pub builtin_ids: BuiltinIds,
    pub natives: NativeRegistry,
    pub instructions_per_tick: u32,
    pub last_error: Option<GscError>,

    threads: Vec<Thread>,
    next_id: ThreadId,
    next_sequence: u64,
    clock: f64,
}

impl Vm {
    pub fn new(instructions_per_tick: u32) -> Self {
        let mut strtab = StringTable::new();
        let builtin_ids = BuiltinIds::intern(&mut strtab);
        let proxy = crate::native::create_default_proxy(&mut strtab, &builtin_ids);
        let make_root = || {
            let o = Rc::new(RefCell::new(Object::new()));
            o.borrow_mut().proxy = Some(proxy.clone());
            o
        };
        Vm {
            strtab,
            files: IndexMap::new(),
            globals: Globals { anonymous: Rc::new(RefCell::new(Object::new())), level: make_root(), anim: make_root(), game: make_root() },
            builtin_ids,
            natives: NativeRegistry::new(),
            instructions_per_tick,
            last_error: None,
            threads: Vec::new(),
            next_id: 0,
            next_sequence: 0,
            clock: 0.0,
        }
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn global_object(&self, slot: GlobalSlot) -> ObjectRef {
        match slot {
            GlobalSlot::Level => self.globals.level.clone(),
            GlobalSlot::Anim => self.globals.anim.clone(),
            GlobalSlot::Game => self.globals.game.clone(),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let s = self.next_sequence;
        self.next_sequence += 1;
        s
    }

    /// Spawns a new thread with `entry` as its first frame. The thread
    /// becomes runnable at the end of the current tick (spec §4.5), which
    /// falls out naturally here: a freshly spawned thread is `Runnable`
    /// immediately, but is only picked up by [`Vm::update`]'s next pass.
    pub fn spawn(&mut self, entry: Frame) -> ThreadId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_sequence();
        log::debug!("spawning thread {id} running '{}'", entry.function.name);
        self.threads.push(Thread::new(id, seq, entry));
        id
    }

    pub fn thread_count(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_terminal()).count()
    }

    fn thread_index(&self, id: ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| t.id == id)
    }

    pub fn resolve_function(&self, file: &str, function: &str) -> Option<Rc<crate::opcode::CompiledFunction>> {
        self.files.get(file).and_then(|f| f.functions.get(function)).cloned()
    }

    /// Synchronous host-initiated call (spec §6 `call`): runs `func` to
    /// completion on a throwaway thread and returns its value. A function
    /// that tries to `wait`/`waittill` here has nothing to resume it later,
    /// so that's reported as an error instead of silently hanging forever —
    /// script code should use `thread f()` for anything that suspends.
    pub fn call(&mut self, func: Rc<crate::opcode::CompiledFunction>, this: Option<ObjectRef>, args: Vec<Value>) -> GscResult<Value> {
        let id = self.spawn(Frame::new(func, this, args));
        loop {
            let idx = self.thread_index(id).expect("just spawned");
            if self.threads[idx].frames.is_empty() || self.threads[idx].is_terminal() {
                break;
            }
            if !matches!(self.threads[idx].state, ThreadState::Runnable) {
                self.threads[idx].frames.clear();
                self.threads[idx].state = ThreadState::Done;
                self.threads.retain(|t| t.id != id);
                return Err(GscError::host("a directly called function attempted to suspend (wait/waittill/waittillframeend); spawn it with 'thread' instead"));
            }
            // A directly-called function has no later tick to be re-queued
            // onto (spec §4.5 rule 2(d) assumes an `update()` loop), so
            // running past the quota here is as unrecoverable as an actual
            // suspend attempt — report it instead of retrying forever.
            if matches!(self.run_thread(id)?, RunOutcome::QuotaExceeded) {
                self.threads[idx].frames.clear();
                self.threads[idx].state = ThreadState::Done;
                self.threads.retain(|t| t.id != id);
                return Err(GscError::host("a directly called function exceeded the per-tick instruction quota; spawn it with 'thread' instead"));
            }
        }
        let idx = self.thread_index(id).expect("still present until we retain it out");
        let outcome = match &self.threads[idx].state {
            ThreadState::Error(e) => Err(e.clone()),
            _ => Ok(self.threads[idx].operand_stack.pop().unwrap_or(Value::Undefined)),
        };
        self.threads.retain(|t| t.id != id);
        outcome
    }

    /// Synchronous host-initiated method call (spec §6 `call_method`):
    /// resolves `name` through `receiver`'s fields/proxy chain the same way
    /// a script-level method call does, then runs it like [`Vm::call`].
    pub fn call_method(&mut self, receiver: ObjectRef, name: &str, args: Vec<Value>) -> GscResult<Value> {
        let name_id = self.strtab.intern(name);
        if self.builtin_ids.is_builtin(name_id) {
            return Err(GscError::host("cannot directly call a built-in proxy method from the host"));
        }
        match Object::resolve_method(&receiver, name_id) {
            Some(Value::Function(FunctionValue::Script(f))) => self.call(f, Some(receiver), args),
            Some(Value::Function(FunctionValue::Native(native_id))) => {
                let native = self.natives.get(native_id).ok_or_else(|| GscError::host("undefined native function"))?;
                let mut stack = crate::evaluation_stack::EvaluationStack::new();
                let nargs = args.len() as u16;
                for a in args {
                    stack.push(a);
                }
                native(&mut stack, nargs)?;
                Ok(if stack.is_empty() { Value::Undefined } else { stack.pop()? })
            }
            Some(_) | None => Err(GscError::host(format!("undefined method '{name}'"))),
        }
    }

    /// Runs every runnable thread to its next suspend point (spec §4.5).
    /// `home_file` resolves unqualified top-level calls made from scripts
    /// that were `call`ed directly rather than spawned from another
    /// script frame — in practice every frame already carries its own
    /// function, so same-file calls resolve via the frame's own file; this
    /// parameter exists for forwarding from [`Vm::call`].
    pub fn update(&mut self, dt: f64) -> GscResult<bool> {
        self.clock += dt;
        for t in &mut self.threads {
            if let ThreadState::WaitingTime(deadline) = t.state {
                if deadline <= self.clock {
                    t.state = ThreadState::Runnable;
                }
            }
        }
        // Threads that already burned their quota this tick (spec §4.5 rule
        // 2(d)): they're still `Runnable`, but re-queued for a *later*
        // `update()` call, not retried here — without this, a thread whose
        // body never suspends (e.g. `while(1){}`) would be handed a fresh
        // budget and retried forever, and `update()` would never return.
        let mut quota_exhausted: hashbrown::HashSet<ThreadId> = hashbrown::HashSet::new();
        loop {
            let mut ran_any = false;
            loop {
                let mut runnable: Vec<ThreadId> = self
                    .threads
                    .iter()
                    .filter(|t| matches!(t.state, ThreadState::Runnable) && !quota_exhausted.contains(&t.id))
                    .map(|t| t.id)
                    .collect();
                runnable.sort_by_key(|id| self.threads[self.thread_index(*id).unwrap()].sequence);
                if runnable.is_empty() {
                    break;
                }
                for id in runnable {
                    if let Some(idx) = self.thread_index(id) {
                        if matches!(self.threads[idx].state, ThreadState::Runnable) && !quota_exhausted.contains(&id) {
                            if matches!(self.run_thread(id)?, RunOutcome::QuotaExceeded) {
                                quota_exhausted.insert(id);
                            }
                            ran_any = true;
                        }
                    }
                }
            }
            let mut promoted = false;
            for t in &mut self.threads {
                if matches!(t.state, ThreadState::WaitingFrameEnd) {
                    t.state = ThreadState::Runnable;
                    promoted = true;
                }
            }
            if !promoted {
                let _ = ran_any;
                break;
            }
        }
        self.threads.retain(|t| !matches!(t.state, ThreadState::Done));
        Ok(self.threads.iter().any(|t| !t.is_terminal()))
    }

    /// Executes one thread until it suspends, returns from its last frame,
    /// errors, or exceeds the per-tick instruction quota. The quota case is
    /// reported distinctly (see [`RunOutcome`]) so callers don't mistake
    /// "still runnable, just out of budget this call" for an actual
    /// suspension and retry it in a hot loop.
    fn run_thread(&mut self, id: ThreadId) -> GscResult<RunOutcome> {
        let mut budget = self.instructions_per_tick;
        loop {
            if budget == 0 {
                return Ok(RunOutcome::QuotaExceeded);
            }
            budget -= 1;

            let idx = match self.thread_index(id) {
                Some(i) => i,
                None => return Ok(RunOutcome::Suspended),
            };
            if self.threads[idx].frames.is_empty() {
                self.threads[idx].state = ThreadState::Done;
                return Ok(RunOutcome::Suspended);
            }
            let (instr, file, function, line) = {
                let frame = self.threads[idx].frames.last().unwrap();
                let instr = frame.function.instructions.get(frame.ip).cloned();
                let line = frame.function.source_map.get(frame.ip).copied().unwrap_or(0);
                match instr {
                    Some(i) => (i, "?".to_string(), frame.function.name.clone(), line),
                    None => {
                        self.threads[idx].state = ThreadState::Done;
                        return Ok(RunOutcome::Suspended);
                    }
                }
            };
            self.threads[idx].frames.last_mut().unwrap().ip += 1;
            log::trace!("thread {id}: {instr:?}");

            match self.dispatch(id, &instr) {
                Ok(Dispatched::Continue) => continue,
                Ok(Dispatched::Suspended) => return Ok(RunOutcome::Suspended),
                Ok(Dispatched::Terminated) => return Ok(RunOutcome::Suspended),
                Err(e) => {
                    let e = match &e {
                        GscError::RuntimeError { .. } => e,
                        other => GscError::runtime(file, function, line, other.to_string()),
                    };
                    log::error!("thread {id} faulted: {e}");
                    if let Some(idx) = self.thread_index(id) {
                        self.threads[idx].frames.clear();
                        self.threads[idx].state = ThreadState::Error(e.clone());
                    }
                    self.last_error = Some(e);
                    return Ok(RunOutcome::Suspended);
                }
            }
        }
    }

    fn dispatch(&mut self, id: ThreadId, instr: &Instruction) -> GscResult<Dispatched> {
        let idx = self.thread_index(id).expect("thread exists for the duration of dispatch");

        macro_rules! frame {
            () => {
                self.threads[idx].frames.last_mut().unwrap()
            };
        }
        macro_rules! push {
            ($v:expr) => {
                self.threads[idx].operand_stack.push($v)
            };
        }
        macro_rules! pop {
            () => {
                self.threads[idx].operand_stack.pop()?
            };
        }

        match instr {
            Instruction::PushInt(v) => push!(Value::Int(*v)),
            Instruction::PushFloat(v) => push!(Value::Float(*v)),
            Instruction::PushVec3(x, y, z) => push!(Value::Vec3(*x, *y, *z)),
            Instruction::PushString(id) => push!(Value::String(*id)),
            Instruction::PushBool(b) => push!(Value::Bool(*b)),
            Instruction::PushUndefined => push!(Value::Undefined),
            Instruction::PushSelf => {
                let this = frame!().this.clone();
                push!(this.map(Value::Object).unwrap_or(Value::Undefined));
            }

            Instruction::LoadLocal(slot) => {
                let v = frame!().locals.borrow().get(*slot as usize).cloned().unwrap_or(Value::Undefined);
                push!(v);
            }
            Instruction::StoreLocal(slot) => {
                let v = pop!();
                let locals = frame!().locals.clone();
                let mut locals = locals.borrow_mut();
                if (*slot as usize) >= locals.len() {
                    locals.resize(*slot as usize + 1, Value::Undefined);
                }
                locals[*slot as usize] = v;
            }
            Instruction::PushLocalRef(slot) => {
                let locals = frame!().locals.clone();
                push!(Value::Reference(Reference::Local(locals, *slot)));
            }

            Instruction::LoadField(field) => {
                let obj = pop!();
                let v = self.read_field(&obj, *field)?;
                push!(v);
            }
            Instruction::StoreField(field) => {
                let value = pop!();
                let obj = pop!();
                self.write_field(&obj, *field, value)?;
            }
            Instruction::PushFieldRef(field) => {
                let obj = pop!();
                match obj {
                    Value::Object(o) => push!(Value::Reference(Reference::Field(o, *field))),
                    other => return Err(GscError::host(format!("cannot take a field reference on a {}", other.type_name()))),
                }
            }

            Instruction::LoadIndexed => {
                let index = pop!();
                let obj = pop!();
                let v = self.read_indexed(&obj, &index)?;
                push!(v);
            }
            Instruction::StoreIndexed => {
                let value = pop!();
                let index = pop!();
                let obj = pop!();
                self.write_indexed(&obj, &index, value)?;
            }

            Instruction::Dup => {
                let v = self.threads[idx].operand_stack.peek(0).cloned().ok_or_else(|| GscError::host("dup on empty stack"))?;
                push!(v);
            }
            Instruction::Dup2 => {
                let b = self.threads[idx].operand_stack.peek(0).cloned().ok_or_else(|| GscError::host("dup2 on short stack"))?;
                let a = self.threads[idx].operand_stack.peek(1).cloned().ok_or_else(|| GscError::host("dup2 on short stack"))?;
                push!(a);
                push!(b);
            }
            Instruction::Pop => {
                pop!();
            }

            Instruction::LoadGlobal(slot) => {
                let v = Value::Object(self.global_object(*slot));
                push!(v);
            }

            Instruction::BinaryOp(op) => {
                let b = pop!();
                let a = pop!();
                push!(eval_binop(*op, a, b)?);
            }
            Instruction::UnaryOp(op) => {
                let a = pop!();
                push!(eval_unop(*op, a)?);
            }

            Instruction::Jump(target) => {
                frame!().ip = *target;
            }
            Instruction::JumpIfTrue(target) => {
                let v = pop!();
                if v.truthy() {
                    frame!().ip = *target;
                }
            }
            Instruction::JumpIfFalse(target) => {
                let v = pop!();
                if !v.truthy() {
                    frame!().ip = *target;
                }
            }

            Instruction::Call { callee, argc } => {
                let args = self.threads[idx].operand_stack.pop_n(*argc as usize)?;
                let func = self.resolve_callee(idx, callee, &args)?;
                self.enter_call(idx, func, None, args)?;
                return Ok(Dispatched::Continue);
            }
            Instruction::ThreadCall { callee, argc } => {
                let args = self.threads[idx].operand_stack.pop_n(*argc as usize)?;
                let func = self.resolve_callee(idx, callee, &args)?;
                self.spawn_call(func, None, args);
                push!(Value::Undefined);
            }
            Instruction::MethodCall { name, argc } => {
                let mut args = self.threads[idx].operand_stack.pop_n(*argc as usize)?;
                let recv = self.threads[idx].operand_stack.pop()?;
                let this = as_object(&recv)?;
                if self.builtin_ids.is_builtin(*name) {
                    let result = self.call_builtin(id, &this, *name, &mut args)?;
                    push!(result);
                    return Ok(Dispatched::Continue);
                }
                let func = self.resolve_method_callee(idx, &this, *name)?;
                self.enter_call(idx, func, Some(this), args)?;
                return Ok(Dispatched::Continue);
            }
            Instruction::ThreadMethodCall { name, argc } => {
                let args = self.threads[idx].operand_stack.pop_n(*argc as usize)?;
                let recv = self.threads[idx].operand_stack.pop()?;
                let this = as_object(&recv)?;
                let func = self.resolve_method_callee(idx, &this, *name)?;
                self.spawn_call(func, Some(this), args);
                push!(Value::Undefined);
            }

            Instruction::Return => {
                let ret = pop!();
                self.threads[idx].frames.pop();
                if self.threads[idx].frames.is_empty() {
                    self.threads[idx].state = ThreadState::Done;
                    // Nothing reads a spawned thread's final value, but a
                    // synchronous `Vm::call` needs it, so it's left on the
                    // (otherwise unused, about-to-be-discarded) stack.
                    push!(ret);
                    return Ok(Dispatched::Terminated);
                }
                push!(ret);
            }

            Instruction::Wait => {
                let v = pop!();
                let secs = v.as_number().ok_or_else(|| GscError::host("wait expects a number"))?;
                if secs <= 0.0 {
                    return Err(GscError::host("wait requires a positive duration"));
                }
                self.threads[idx].state = ThreadState::WaitingTime(self.clock + secs);
                return Ok(Dispatched::Suspended);
            }
            Instruction::WaitTillFrameEnd => {
                self.threads[idx].state = ThreadState::WaitingFrameEnd;
                return Ok(Dispatched::Suspended);
            }

            Instruction::BuildObject => {
                push!(Value::Object(Rc::new(RefCell::new(Object::new()))));
            }
        }
        Ok(Dispatched::Continue)
    }

    fn read_field(&self, v: &Value, field: i32) -> GscResult<Value> {
        match v {
            Value::Object(o) => Ok(o.borrow().get_field(field)),
            other => Err(GscError::host(format!("cannot read a field on a {}", other.type_name()))),
        }
    }

    fn write_field(&self, v: &Value, field: i32, value: Value) -> GscResult<()> {
        match v {
            Value::Object(o) => {
                o.borrow_mut().set_field(field, value);
                Ok(())
            }
            other => Err(GscError::host(format!("cannot set a field on a {}", other.type_name()))),
        }
    }

    fn read_indexed(&mut self, obj: &Value, index: &Value) -> GscResult<Value> {
        // Arrays are modeled as objects with integer-string interned keys,
        // the same field map every other object uses (spec §3 names no
        // separate array type).
        let key = self.index_key(index)?;
        self.read_field(obj, key)
    }

    fn write_indexed(&mut self, obj: &Value, index: &Value, value: Value) -> GscResult<()> {
        let key = self.index_key(index)?;
        self.write_field(obj, key, value)
    }

    fn index_key(&mut self, index: &Value) -> GscResult<i32> {
        match index {
            Value::Int(i) => Ok(self.strtab.intern(&i.to_string())),
            Value::String(id) => Ok(*id),
            other => Err(GscError::host(format!("invalid index type {}", other.type_name()))),
        }
    }

    fn resolve_callee(&mut self, idx: usize, callee: &Callee, args: &[Value]) -> GscResult<Value> {
        match callee {
            Callee::ByName(name) => {
                // Resolves within the calling frame's own file (spec §4.4):
                // the linker already flattened `#include`d functions into
                // each file's own table, so a direct lookup against the
                // frame's owning file is exactly "own definitions plus
                // linked-in includes".
                let file = self.threads[idx].frames.last().unwrap().function.file.clone();
                if let Some(func) = self.files.get(&file).and_then(|f| f.functions.get(name)) {
                    return Ok(Value::Function(FunctionValue::Script(func.clone())));
                }
                // Falls back to a host-registered native, "invoked as if a
                // script function of that name existed" (spec §6).
                let name_id = self.strtab.intern(name);
                if self.natives.get(name_id).is_some() {
                    return Ok(Value::Function(FunctionValue::Native(name_id)));
                }
                Err(GscError::host(format!("undefined function '{file}::{name}'")))
            }
            Callee::ByFile { file, function } => {
                let f = self.files.get(file).ok_or_else(|| GscError::host(format!("undefined function '{file}::{function}'")))?;
                let func = f.functions.get(function).ok_or_else(|| GscError::host(format!("undefined function '{file}::{function}'")))?;
                Ok(Value::Function(FunctionValue::Script(func.clone())))
            }
            Callee::ByValue => {
                let _ = args;
                self.threads[idx].operand_stack.pop()
            }
        }
    }

    /// Resolves `obj f(args)` / `obj thread f(args)` (spec §4.2, §4.3). Most
    /// method calls name an ordinary script function, not a value actually
    /// stored as a field on `this` — `obj f()` means "call `f` the way an
    /// unqualified call would, with `self` bound to `obj`" (spec §4.7 names
    /// only the four built-ins as proxy-resolved; everything else falls
    /// back to the calling frame's own file table, same as `Callee::ByName`).
    /// A field/proxy match, if one exists (e.g. a function value an embedder
    /// stored directly on the object), still takes priority.
    fn resolve_method_callee(&mut self, idx: usize, this: &ObjectRef, name: i32) -> GscResult<Value> {
        if let Some(v) = Object::resolve_method(this, name) {
            return Ok(v);
        }
        let file = self.threads[idx].frames.last().unwrap().function.file.clone();
        let name_str = self.strtab.get(name).unwrap_or("?").to_string();
        if let Some(func) = self.files.get(&file).and_then(|f| f.functions.get(&name_str)) {
            return Ok(Value::Function(FunctionValue::Script(func.clone())));
        }
        if self.natives.get(name).is_some() {
            return Ok(Value::Function(FunctionValue::Native(name)));
        }
        Err(GscError::host(format!("undefined method '{name_str}'")))
    }

    fn enter_call(&mut self, idx: usize, func: Value, this: Option<ObjectRef>, args: Vec<Value>) -> GscResult<()> {
        match func {
            Value::Function(FunctionValue::Script(f)) => {
                let id = self.threads[idx].id;
                self.threads[idx].frames.push(Frame::new(f, this, args));
                let _ = id;
                Ok(())
            }
            Value::Function(FunctionValue::Native(name_id)) => {
                let native = self.natives.get(name_id).ok_or_else(|| GscError::host("undefined native function"))?;
                let mut stack = crate::evaluation_stack::EvaluationStack::new();
                for a in args {
                    stack.push(a);
                }
                let nargs_len = stack.len() as u16;
                native(&mut stack, nargs_len)?;
                let result = if stack.is_empty() { Value::Undefined } else { stack.pop()? };
                self.threads[idx].operand_stack.push(result);
                Ok(())
            }
            other => Err(GscError::host(format!("cannot call a {}", other.type_name()))),
        }
    }

    fn spawn_call(&mut self, func: Value, this: Option<ObjectRef>, args: Vec<Value>) {
        if let Value::Function(FunctionValue::Script(f)) = func {
            self.spawn(Frame::new(f, this, args));
        }
    }

    fn call_builtin(&mut self, thread_id: ThreadId, receiver: &ObjectRef, name: i32, args: &mut Vec<Value>) -> GscResult<Value> {
        if name == self.builtin_ids.endon {
            let event_name = self.string_arg(args, 0)?;
            let idx = self.thread_index(thread_id).unwrap();
            self.threads[idx].endon_events.push((receiver.clone(), event_name));
            Ok(Value::Undefined)
        } else if name == self.builtin_ids.notify {
            let event_name = self.string_arg(args, 0)?;
            let payload: SmallVec<[Value; 4]> = args.drain(1..).collect();
            self.do_notify(receiver, event_name, &payload);
            Ok(Value::Undefined)
        } else if name == self.builtin_ids.waittill || name == self.builtin_ids.waittillmatch {
            let raw_name = self.string_arg(args, 0)?;
            let event_name = if name == self.builtin_ids.waittillmatch {
                let bytes = self.strtab.get(raw_name).unwrap_or("").to_string();
                self.strtab.intern(&format!("$nt_{bytes}"))
            } else {
                raw_name
            };
            let mut out_refs = SmallVec::new();
            for v in args.drain(1..) {
                match v {
                    Value::Reference(r) => out_refs.push(r),
                    other => return Err(GscError::host(format!("waittill expects reference arguments, got {}", other.type_name()))),
                }
            }
            let idx = self.thread_index(thread_id).unwrap();
            self.threads[idx].state = ThreadState::WaitingEvent(WaittillSpec { object: receiver.clone(), name_id: event_name, out_refs });
            Ok(Value::Undefined)
        } else {
            Err(GscError::host("unrecognized builtin method"))
        }
    }

    fn string_arg(&self, args: &[Value], i: usize) -> GscResult<i32> {
        match args.get(i) {
            Some(Value::String(id)) => Ok(*id),
            _ => Err(GscError::host("expected a string argument")),
        }
    }

    /// Endon/notify/waittill delivery (spec §4.6, §4.7). Endon precedence
    /// is applied before event delivery to the *same* thread (spec §4.5,
    /// property 6): a thread that is both `endon`'d and waiting on the
    /// notified name terminates and never sees the value.
    fn do_notify(&mut self, object: &ObjectRef, name_id: i32, args: &[Value]) {
        let mut terminated: Vec<ThreadId> = Vec::new();
        for t in &mut self.threads {
            if t.endon_events.iter().any(|(o, n)| Rc::ptr_eq(o, object) && *n == name_id) {
                t.frames.clear();
                t.state = ThreadState::Done;
                terminated.push(t.id);
            }
        }
        if !terminated.is_empty() {
            log::debug!("endon terminated threads {terminated:?} on notify");
        }

        let mut waiters: Vec<usize> = self
            .threads
            .iter()
            .enumerate()
            .filter(|(_, t)| !terminated.contains(&t.id))
            .filter_map(|(i, t)| match &t.state {
                ThreadState::WaitingEvent(spec) if Rc::ptr_eq(&spec.object, object) && spec.name_id == name_id => Some(i),
                _ => None,
            })
            .collect();
        waiters.sort_by_key(|&i| self.threads[i].sequence);
        if waiters.is_empty() && terminated.is_empty() {
            log::warn!("notify(name_id={name_id}) had no waiters");
        }

        for i in waiters {
            if let ThreadState::WaitingEvent(spec) = std::mem::replace(&mut self.threads[i].state, ThreadState::Runnable) {
                for (slot, out_ref) in spec.out_refs.iter().enumerate() {
                    out_ref.set(args.get(slot).cloned().unwrap_or(Value::Undefined));
                }
            }
        }
    }
}

enum Dispatched {
    Continue,
    Suspended,
    Terminated,
}

/// What a single [`Vm::run_thread`] call accomplished, distinguishing a real
/// suspension point (spec §4.5: `wait`/`waittillframeend`/`waittill`/
/// `waittillmatch`, or the thread finishing/erroring) from merely running
/// out of the per-tick instruction quota while still `Runnable` (spec §5,
/// §4.5 rule 2(d)) — the latter must not be retried within the same
/// `update`/`call`, only picked up again on a later tick.
enum RunOutcome {
    Suspended,
    QuotaExceeded,
}

fn as_object(v: &Value) -> GscResult<ObjectRef> {
    match v {
        Value::Object(o) => Ok(o.clone()),
        other => Err(GscError::host(format!("method call on a non-object receiver ({})", other.type_name()))),
    }
}

fn eval_binop(op: crate::opcode::BinOp, a: Value, b: Value) -> GscResult<Value> {
    use crate::opcode::BinOp::*;
    match op {
        Eq => return Ok(Value::Bool(values_equal(&a, &b))),
        Ne => return Ok(Value::Bool(!values_equal(&a, &b))),
        And => return Ok(Value::Bool(a.truthy() && b.truthy())),
        Or => return Ok(Value::Bool(a.truthy() || b.truthy())),
        _ => {}
    }
    let (x, y) = (
        a.as_number().ok_or_else(|| GscError::host(format!("cannot apply arithmetic to a {}", a.type_name())))?,
        b.as_number().ok_or_else(|| GscError::host(format!("cannot apply arithmetic to a {}", b.type_name())))?,
    );
    let both_int = matches!(a, Value::Int(_)) && matches!(b, Value::Int(_));
    Ok(match op {
        Add if both_int => Value::Int(x as i64 + y as i64),
        Add => Value::Float(x + y),
        Sub if both_int => Value::Int(x as i64 - y as i64),
        Sub => Value::Float(x - y),
        Mul if both_int => Value::Int(x as i64 * y as i64),
        Mul => Value::Float(x * y),
        Div if both_int && y as i64 != 0 => Value::Int(x as i64 / y as i64),
        Div => Value::Float(x / y),
        Mod if both_int && y as i64 != 0 => Value::Int(x as i64 % y as i64),
        Mod => Value::Float(x % y),
        Lt => Value::Bool(x < y),
        Le => Value::Bool(x <= y),
        Gt => Value::Bool(x > y),
        Ge => Value::Bool(x >= y),
        Eq | Ne | And | Or => unreachable!("handled above"),
    })
}

fn eval_unop(op: crate::opcode::UnOp, a: Value) -> GscResult<Value> {
    use crate::opcode::UnOp::*;
    match op {
        Not => Ok(Value::Bool(!a.truthy())),
        Neg => match a {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(GscError::host(format!("cannot negate a {}", other.type_name()))),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Vec3(x1, y1, z1), Value::Vec3(x2, y2, z2)) => x1 == x2 && y1 == y2 && z1 == z2,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;

    fn load(vm: &mut Vm, name: &str, src: &str) {
        let out = compiler::compile_file(name, src, &mut vm.strtab).unwrap();
        let mut file = CompiledFile::not_started(name);
        file.state = crate::file::FileState::Done;
        file.functions = out.functions;
        vm.files.insert(name.to_string(), file);
    }

    #[test]
    fn field_assignment_and_addition() {
        let mut vm = Vm::new(100_000);
        load(&mut vm, "main", "main(){ a=1; b=2; level.x = a+b; }");
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.0).unwrap();
        let x_id = vm.strtab.intern("x");
        assert!(matches!(vm.globals.level.borrow().get_field(x_id), Value::Int(3)));
    }

    #[test]
    fn wait_suspends_across_ticks() {
        let mut vm = Vm::new(100_000);
        load(&mut vm, "main", "main(){ wait 0.1; level.done = true; }");
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        let done_id = vm.strtab.intern("done");
        vm.update(0.05).unwrap();
        assert!(matches!(vm.globals.level.borrow().get_field(done_id), Value::Undefined));
        vm.update(0.05).unwrap();
        assert!(matches!(vm.globals.level.borrow().get_field(done_id), Value::Undefined));
        vm.update(0.05).unwrap();
        assert!(matches!(vm.globals.level.borrow().get_field(done_id), Value::Bool(true)));
    }

    #[test]
    fn waittill_and_notify_deliver_the_value() {
        let mut vm = Vm::new(100_000);
        load(
            &mut vm,
            "main",
            r#"a(){ self waittill("go", v); level.v = v; } main(){ level thread a(); wait 0.05; level notify("go", 42); }"#,
        );
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.05).unwrap();
        vm.update(0.05).unwrap();
        let v_id = vm.strtab.intern("v");
        assert!(matches!(vm.globals.level.borrow().get_field(v_id), Value::Int(42)));
    }

    #[test]
    fn endon_terminates_the_waiting_thread() {
        let mut vm = Vm::new(100_000);
        load(
            &mut vm,
            "main",
            r#"a(){ self endon("stop"); while(1){ wait 0.1; } } main(){ level thread a(); wait 0.05; level notify("stop"); }"#,
        );
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.05).unwrap();
        vm.update(0.05).unwrap();
        assert_eq!(vm.thread_count(), 0);
    }

    #[test]
    fn method_call_on_a_global_resolves_an_ordinary_function_by_name() {
        // `level f()` names a plain script function, not a field actually
        // stored on `level` — only the four built-ins live on the proxy.
        let mut vm = Vm::new(100_000);
        load(&mut vm, "main", "greet(){ level.hello = self == level; } main(){ level greet(); }");
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.0).unwrap();
        let hello_id = vm.strtab.intern("hello");
        assert!(matches!(vm.globals.level.borrow().get_field(hello_id), Value::Bool(true)));
    }

    #[test]
    fn an_unqualified_call_falls_back_to_a_registered_native() {
        let mut vm = Vm::new(100_000);
        load(&mut vm, "main", "main(){ level.y = double(21); }");
        let name_id = vm.strtab.intern("double");
        vm.natives.register(
            name_id,
            Rc::new(|stack: &mut crate::evaluation_stack::EvaluationStack, nargs| {
                let args = stack.pop_n(nargs as usize)?;
                let n = args[0].as_number().unwrap_or(0.0);
                stack.push(Value::Int(n as i64 * 2));
                Ok(())
            }),
        );
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.0).unwrap();
        let y_id = vm.strtab.intern("y");
        assert!(matches!(vm.globals.level.borrow().get_field(y_id), Value::Int(42)));
    }

    #[test]
    fn function_call_returns_its_value() {
        let mut vm = Vm::new(100_000);
        load(&mut vm, "main", "f(x){ return x*x; } main(){ level.y = f(7); }");
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        vm.update(0.0).unwrap();
        let y_id = vm.strtab.intern("y");
        assert!(matches!(vm.globals.level.borrow().get_field(y_id), Value::Int(49)));
    }

    #[test]
    fn a_thread_that_never_suspends_defers_to_a_later_tick_instead_of_hanging() {
        let mut vm = Vm::new(10);
        load(&mut vm, "main", "main(){ while(1){} }");
        let f = vm.resolve_function("main", "main").unwrap();
        vm.spawn(Frame::new(f, None, vec![]));
        // Must return rather than retrying the same thread with a fresh
        // budget forever.
        let still_running = vm.update(0.0).unwrap();
        assert!(still_running);
        assert_eq!(vm.thread_count(), 1);
        // Ticking again doesn't panic or hang either; the thread stays
        // runnable, picked up fresh each tick.
        assert!(vm.update(0.0).unwrap());
        assert_eq!(vm.thread_count(), 1);
    }

    #[test]
    fn a_synchronous_call_errors_on_quota_exhaustion_instead_of_hanging() {
        let mut vm = Vm::new(10);
        load(&mut vm, "main", "f(){ while(1){} }");
        let f = vm.resolve_function("main", "f").unwrap();
        let err = vm.call(f, None, vec![]).unwrap_err();
        assert!(err.to_string().contains("quota"));
    }
}
