//! Embedding API (spec §6): create/destroy a context, feed it source files,
//! drive linking, register natives, manipulate objects and globals, call
//! into scripts, and tick the scheduler.
//!
//! This is the thin host-facing shell; all of the actual compile/link/run
//! behavior lives in [`compiler`], [`linker`], and [`engine::Vm`] — `Context`
//! just owns the arenas alongside the VM and translates the embedding API's
//! string-keyed surface into interned-id calls against it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use bitflags::bitflags;

use crate::arena::Arena;
use crate::compiler;
use crate::engine::Vm;
use crate::error::{GscError, GscResult};
use crate::file::{CompiledFile, FileState};
use crate::linker;
use crate::native::NativeFn;
use crate::thread::Frame;
use crate::value::{DebugInfo, Object, ObjectRef, Value};

/// Host-supplied source loader (spec §6 `create(options)`): given a path the
/// linker surfaced via [`Context::next_compile_dependency`], returns its
/// text. Left unimplemented by this crate — reading files is the embedder's
/// job (spec.md §1/§6) — `Context` only calls it when the embedder attaches
/// one via [`ContextOptions::file_loader`].
pub trait FileLoader {
    fn load(&self, path: &str) -> GscResult<String>;
}

bitflags! {
    /// Toggles for [`Context::compile_source`] (spec §6:
    /// `compile_source(path, text, flags)`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompileFlags: u32 {
        /// Recompile even if a file with this name already reached `Done`.
        /// Without this, `compile_source` is a no-op on an already-compiled
        /// file (spec §3: compilation is monotonic).
        const FORCE_RECOMPILE = 1 << 0;
    }
}

/// Sizing and scheduling knobs for a new [`Context`] (spec §6).
pub struct ContextOptions {
    /// Budget for the permanent arena: ASTs, compiled code, object storage.
    pub permanent_arena_size: usize,
    /// Budget for the temporary arena: per-compile scratch space.
    pub temporary_arena_size: usize,
    /// Upper bound on instructions a single thread runs before yielding
    /// back to the scheduler within one [`Context::update`] call.
    pub instructions_per_tick: u32,
    /// Host-supplied file loader, consulted by [`Context::load_dependencies`].
    /// `None` leaves dependency resolution entirely to the embedder driving
    /// `next_compile_dependency`/`compile_source` by hand.
    pub file_loader: Option<Box<dyn FileLoader>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            permanent_arena_size: 64 * 1024 * 1024,
            temporary_arena_size: 4 * 1024 * 1024,
            instructions_per_tick: 100_000,
            file_loader: None,
        }
    }
}

pub struct Context {
    vm: Vm,
    permanent: Arena,
    temporary: Arena,
    file_loader: Option<Box<dyn FileLoader>>,
}

impl Context {
    pub fn create(options: ContextOptions) -> Self {
        Context {
            vm: Vm::new(options.instructions_per_tick),
            permanent: Arena::new(options.permanent_arena_size),
            temporary: Arena::new(options.temporary_arena_size),
            file_loader: options.file_loader,
        }
    }

    /// Repeatedly asks the attached [`FileLoader`] for whatever
    /// [`Context::next_compile_dependency`] still names, compiling and
    /// linking each one, until nothing is left unresolved. A no-op (and an
    /// error) if no loader was attached.
    pub fn load_dependencies(&mut self) -> GscResult<()> {
        let loader = self.file_loader.take().ok_or_else(|| GscError::host("no file loader attached to this context"))?;
        let result = (|| {
            while let Some(path) = self.next_compile_dependency() {
                let text = loader.load(&path)?;
                self.compile_source(&path, &text, CompileFlags::empty())?;
                self.link();
            }
            Ok(())
        })();
        self.file_loader = Some(loader);
        result
    }

    /// Consumes the context, dropping every arena, thread, and object it
    /// owns. Spelled out explicitly (rather than left to `Drop`) because
    /// spec §6 lists `destroy` as its own embedding API entry point.
    pub fn destroy(self) {}

    /// Compiles `source` under `filename` (spec §6 `compile_source`). A
    /// syntax/semantic error marks only this file `Failed` and leaves the
    /// rest of the context untouched.
    pub fn compile_source(&mut self, filename: &str, source: &str, flags: CompileFlags) -> GscResult<()> {
        if !flags.contains(CompileFlags::FORCE_RECOMPILE) {
            if let Some(existing) = self.vm.files.get(filename) {
                if existing.state == FileState::Done {
                    return Ok(());
                }
            }
        }
        self.temporary.alloc_str(source)?;
        match compiler::compile_file(filename, source, &mut self.vm.strtab) {
            Ok(out) => {
                let mut file = CompiledFile::not_started(filename);
                file.state = FileState::Done;
                file.functions = out.functions;
                file.includes = out.includes;
                file.file_references = out.file_references;
                file.using_animtree = out.using_animtree;
                self.vm.files.insert(filename.to_string(), file);
                Ok(())
            }
            Err(e @ GscError::CompileError { .. }) => {
                log::warn!("'{filename}' failed to compile: {e}");
                let mut failed = CompiledFile::not_started(filename);
                failed.state = FileState::Failed;
                self.vm.files.insert(filename.to_string(), failed);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Path, not yet compiled, referenced by an `#include` or `file::func()`
    /// in an already-`Done` file — the embedder's cue for what to load off
    /// disk and feed to [`Context::compile_source`] next (spec §6
    /// `next_compile_dependency`). `None` once every dependency is resolved.
    pub fn next_compile_dependency(&self) -> Option<String> {
        let mut needed = HashSet::new();
        for f in self.vm.files.values() {
            if f.state != FileState::Done {
                continue;
            }
            for dep in f.includes.iter().chain(f.file_references.iter()) {
                needed.insert(dep.clone());
            }
        }
        needed.into_iter().find(|name| !self.vm.files.contains_key(name))
    }

    /// Runs `#include` resolution to a fixpoint over every compiled file
    /// (spec §4.4). Safe to call repeatedly as more files finish compiling.
    pub fn link(&mut self) -> bool {
        linker::link(&mut self.vm.files)
    }

    pub fn file_state(&self, filename: &str) -> Option<FileState> {
        self.vm.files.get(filename).map(|f| f.state)
    }

    // --- Objects ---------------------------------------------------------

    pub fn new_object(&self) -> ObjectRef {
        Rc::new(RefCell::new(Object::new()))
    }

    /// Allocates an object carrying `tag` from the moment it's created,
    /// rather than requiring a separate `set_tag` call right after
    /// (original_source's `gsc_add_tagged_object`).
    pub fn new_tagged_object(&self, tag: impl Into<String>) -> ObjectRef {
        let obj = self.new_object();
        obj.borrow_mut().tag = Some(tag.into());
        obj
    }

    /// Stamps `(file, function, line)` debug info onto `object`, interning
    /// the file/function names through the shared string table the way
    /// `intern_string` does in the original (original_source's
    /// `gsc_object_set_debug_info`).
    pub fn set_object_debug_info(&mut self, object: &ObjectRef, file: &str, function: &str, line: u32) {
        let file_id = self.vm.strtab.intern(file);
        let function_id = self.vm.strtab.intern(function);
        object.borrow_mut().debug = Some(DebugInfo { file: file_id, function: function_id, line });
    }

    pub fn get_field(&mut self, object: &ObjectRef, name: &str) -> Value {
        let id = self.vm.strtab.intern(name);
        object.borrow().get_field(id)
    }

    pub fn set_field(&mut self, object: &ObjectRef, name: &str, value: Value) {
        let id = self.vm.strtab.intern(name);
        object.borrow_mut().set_field(id, value);
    }

    pub fn set_proxy(&self, object: &ObjectRef, proxy: Option<ObjectRef>) {
        object.borrow_mut().proxy = proxy;
    }

    pub fn set_tag(&self, object: &ObjectRef, tag: Option<String>) {
        object.borrow_mut().tag = tag;
    }

    pub fn tag(&self, object: &ObjectRef) -> Option<String> {
        object.borrow().tag.clone()
    }

    pub fn set_host_handle(&self, object: &ObjectRef, handle: Rc<dyn std::any::Any>) {
        object.borrow_mut().host_handle = Some(handle);
    }

    // --- Globals -----------------------------------------------------------

    /// The well-known roots `level`/`anim`/`game`, pre-populated with the
    /// default `waittill`/`endon`/`notify`/`waittillmatch` proxy (spec §4.7).
    pub fn global_root(&self, name: &str) -> Option<ObjectRef> {
        match name {
            "level" => Some(self.vm.globals.level.clone()),
            "anim" => Some(self.vm.globals.anim.clone()),
            "game" => Some(self.vm.globals.game.clone()),
            _ => None,
        }
    }

    /// Get/set a named field on the anonymous global object (spec §6), kept
    /// distinct from `level`/`anim`/`game` so embedder-only bookkeeping
    /// doesn't collide with script-visible state on the well-known roots.
    pub fn get_global(&mut self, name: &str) -> Value {
        let id = self.vm.strtab.intern(name);
        self.vm.globals.anonymous.borrow().get_field(id)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let id = self.vm.strtab.intern(name);
        self.vm.globals.anonymous.borrow_mut().set_field(id, value);
    }

    // --- Natives -------------------------------------------------------

    pub fn register_native(&mut self, name: &str, f: NativeFn) {
        let id = self.vm.strtab.intern(name);
        self.vm.natives.register(id, f);
    }

    // --- Calling into scripts --------------------------------------------

    /// `thread file::function(args)` initiated from the host: spawns a new
    /// thread, runnable starting the context's next [`Context::update`]
    /// (spec §6 `call` with an implicit thread, §4.5).
    pub fn spawn(&mut self, file: &str, function: &str, this: Option<ObjectRef>, args: Vec<Value>) -> GscResult<()> {
        let f = self
            .vm
            .resolve_function(file, function)
            .ok_or_else(|| GscError::host(format!("undefined function '{file}::{function}'")))?;
        self.vm.spawn(Frame::new(f, this, args));
        Ok(())
    }

    /// Synchronous call (spec §6 `call`): runs to completion before
    /// returning, erroring if the function tries to suspend.
    pub fn call(&mut self, file: &str, function: &str, this: Option<ObjectRef>, args: Vec<Value>) -> GscResult<Value> {
        let f = self
            .vm
            .resolve_function(file, function)
            .ok_or_else(|| GscError::host(format!("undefined function '{file}::{function}'")))?;
        self.vm.call(f, this, args)
    }

    /// Synchronous method call (spec §6 `call_method`).
    pub fn call_method(&mut self, receiver: ObjectRef, name: &str, args: Vec<Value>) -> GscResult<Value> {
        self.vm.call_method(receiver, name, args)
    }

    // --- Ticking -----------------------------------------------------------

    /// Advances the clock by `dt` and runs every runnable thread to its next
    /// suspend point (spec §4.5). Returns `true` while at least one thread
    /// is still alive.
    pub fn update(&mut self, dt: f64) -> GscResult<bool> {
        self.vm.update(dt)
    }

    pub fn clock(&self) -> f64 {
        self.vm.clock()
    }

    pub fn thread_count(&self) -> usize {
        self.vm.thread_count()
    }

    pub fn take_last_error(&mut self) -> Option<GscError> {
        self.vm.last_error.take()
    }

    pub fn permanent_arena_available(&self) -> usize {
        self.permanent.available()
    }

    pub fn temporary_arena_available(&self) -> usize {
        self.temporary.available()
    }

    pub fn reset_temporary_arena(&mut self) {
        self.temporary.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_is_idempotent_without_force() {
        let mut ctx = Context::create(ContextOptions::default());
        ctx.compile_source("main", "f(){ return 1; }", CompileFlags::empty()).unwrap();
        ctx.compile_source("main", "f(){ return 2; }", CompileFlags::empty()).unwrap();
        let v = ctx.call("main", "f", None, vec![]).unwrap();
        assert!(matches!(v, Value::Int(1)));
    }

    #[test]
    fn force_recompile_replaces_a_done_file() {
        let mut ctx = Context::create(ContextOptions::default());
        ctx.compile_source("main", "f(){ return 1; }", CompileFlags::empty()).unwrap();
        ctx.compile_source("main", "f(){ return 2; }", CompileFlags::FORCE_RECOMPILE).unwrap();
        let v = ctx.call("main", "f", None, vec![]).unwrap();
        assert!(matches!(v, Value::Int(2)));
    }

    #[test]
    fn compile_error_marks_only_that_file_failed() {
        let mut ctx = Context::create(ContextOptions::default());
        let err = ctx.compile_source("broken", "f(){ return 1 2; }", CompileFlags::empty());
        assert!(err.is_err());
        assert_eq!(ctx.file_state("broken"), Some(FileState::Failed));
    }

    #[test]
    fn next_compile_dependency_surfaces_unresolved_includes() {
        let mut ctx = Context::create(ContextOptions::default());
        ctx.compile_source("main", "#include lib;\nf(){ return g(); }", CompileFlags::empty()).unwrap();
        assert_eq!(ctx.next_compile_dependency(), Some("lib".to_string()));
        ctx.compile_source("lib", "g(){ return 5; }", CompileFlags::empty()).unwrap();
        ctx.link();
        assert_eq!(ctx.next_compile_dependency(), None);
        let v = ctx.call("main", "f", None, vec![]).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn fields_round_trip_through_the_context_api() {
        let ctx = Context::create(ContextOptions::default());
        let obj = ctx.new_object();
        let mut ctx = ctx;
        ctx.set_field(&obj, "health", Value::Int(100));
        assert!(matches!(ctx.get_field(&obj, "health"), Value::Int(100)));
    }

    #[test]
    fn global_roots_share_the_default_proxy() {
        let ctx = Context::create(ContextOptions::default());
        let level = ctx.global_root("level").unwrap();
        assert!(level.borrow().proxy.is_some());
    }

    #[test]
    fn call_errors_if_the_function_tries_to_suspend() {
        let mut ctx = Context::create(ContextOptions::default());
        ctx.compile_source("main", "f(){ wait 1; }", CompileFlags::empty()).unwrap();
        assert!(ctx.call("main", "f", None, vec![]).is_err());
    }

    #[test]
    fn tagged_object_carries_its_tag_from_creation() {
        let ctx = Context::create(ContextOptions::default());
        let obj = ctx.new_tagged_object("weapon");
        assert_eq!(ctx.tag(&obj), Some("weapon".to_string()));
    }

    #[test]
    fn debug_info_round_trips_through_the_string_table() {
        let mut ctx = Context::create(ContextOptions::default());
        let obj = ctx.new_object();
        ctx.set_object_debug_info(&obj, "main.gsc", "init", 42);
        let debug = obj.borrow().debug.clone().unwrap();
        assert_eq!(debug.line, 42);
    }

    struct StaticLoader(std::collections::HashMap<String, String>);
    impl FileLoader for StaticLoader {
        fn load(&self, path: &str) -> GscResult<String> {
            self.0.get(path).cloned().ok_or_else(|| GscError::host(format!("no such file '{path}'")))
        }
    }

    #[test]
    fn load_dependencies_pulls_in_every_transitive_include() {
        let mut files = std::collections::HashMap::new();
        files.insert("lib".to_string(), "g(){ return 9; }".to_string());
        let mut ctx = Context::create(ContextOptions { file_loader: Some(Box::new(StaticLoader(files))), ..ContextOptions::default() });
        ctx.compile_source("main", "#include lib;\nf(){ return g(); }", CompileFlags::empty()).unwrap();
        ctx.load_dependencies().unwrap();
        let v = ctx.call("main", "f", None, vec![]).unwrap();
        assert!(matches!(v, Value::Int(9)));
    }
}
