//! # gsc-vm
//!
//! A compiler and cooperative virtual machine for GSC, the C-like scripting
//! language used to script a game world: objects, `level`/`anim`/`game`
//! globals, threaded function calls, and the `notify`/`waittill`/`endon`
//! event model.
//!
//! ## Pipeline
//!
//! - [`lexer`] / [`parser`] / [`ast`] turn source text into a tagged syntax
//!   tree, tracking `#include`/`#using_animtree` directives and qualified
//!   `file::function()` references along the way.
//! - [`compiler`] lowers each function to a flat [`opcode::Instruction`]
//!   stream.
//! - [`linker`] resolves `#include`s to a fixpoint, copying functions
//!   between already-compiled files' tables.
//! - [`engine::Vm`] owns the thread pool, the interned string table, the
//!   compiled file tables, and the globals, and dispatches instructions one
//!   thread at a time.
//! - [`context::Context`] is the embedding surface: create a context, feed
//!   it source, link, register natives, call into scripts, tick the clock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gsc_vm::context::{CompileFlags, Context, ContextOptions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ctx = Context::create(ContextOptions::default());
//! ctx.compile_source("main", "main(){ level.ready = true; }", CompileFlags::empty())?;
//! ctx.link();
//! ctx.call("main", "main", None, vec![])?;
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

/// Bump-allocated permanent/temporary memory regions.
pub mod arena;
/// Tagged syntax tree produced by the parser.
pub mod ast;
/// AST → instruction-stream lowering.
pub mod compiler;
/// The embedding API: context lifecycle, compile/link, natives, calls, ticks.
pub mod context;
/// Thread pool, dispatch loop, and event delivery.
pub mod engine;
/// Error types shared by the compiler and the VM.
pub mod error;
/// A thread's operand stack.
pub mod evaluation_stack;
/// A single compiled source file's state and function table.
pub mod file;
/// Source text → token stream.
pub mod lexer;
/// Cross-file `#include` resolution.
pub mod linker;
/// Native function registration and the default object proxy.
pub mod native;
/// The linear instruction set and compiled-function representation.
pub mod opcode;
/// Token stream → AST.
pub mod parser;
/// Interned string table.
pub mod strtab;
/// Script threads: frames, suspension state, `waittill` specs.
pub mod thread;
/// Dynamic values and objects.
pub mod value;

pub use context::{CompileFlags, Context, ContextOptions};
pub use error::{GscError, GscResult};
pub use value::Value;
