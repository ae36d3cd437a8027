//! Error types for the GSC compiler and virtual machine.
//!
//! Mirrors the taxonomy in the specification: out-of-memory is a distinguished
//! kind that aborts whatever entry point triggered it, compile errors mark a
//! single file as failed without touching the rest of the context, and
//! runtime/host errors are thread-local.

use thiserror::Error;

/// Every failure kind the core can produce.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GscError {
    /// An arena was exhausted. Propagates out of the current `compile`,
    /// `link`, `call`, or `update` call; the context remains usable for
    /// the next entry point (there is no free-running corruption, only
    /// exhaustion).
    #[error("out of memory")]
    OutOfMemory,

    /// A syntax or semantic error during parse/compile of a single file.
    /// Never aborts compilation of other files.
    #[error("{file}:{line}: {message}")]
    CompileError {
        file: String,
        line: u32,
        message: String,
    },

    /// Declared for taxonomic completeness (spec §7/§9): the reference
    /// implementation never raises this. Unresolved `file::function()`
    /// calls fail lazily as `RuntimeError::UndefinedFunction` at the call
    /// site instead of at link time. No code in this crate constructs
    /// this variant; it exists so embedders matching against the error
    /// enum don't need an `_ =>` arm to stay exhaustive-friendly.
    #[error("link error: {message}")]
    LinkError { message: String },

    /// A thread-local failure: bad type, out-of-range argument, undefined
    /// function at call time, failed conversion, stack underflow, invalid
    /// `waittill` reference, unknown interned name.
    #[error("{file}:{function}:{line}: {message}")]
    RuntimeError {
        file: String,
        function: String,
        line: u32,
        message: String,
    },

    /// A native (host) callback reported a failure. Propagates exactly
    /// like `RuntimeError`.
    #[error("host error: {message}")]
    HostError { message: String },
}

impl GscError {
    pub fn runtime(
        file: impl Into<String>,
        function: impl Into<String>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        GscError::RuntimeError { file: file.into(), function: function.into(), line, message: message.into() }
    }

    pub fn compile(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        GscError::CompileError { file: file.into(), line, message: message.into() }
    }

    pub fn host(message: impl Into<String>) -> Self {
        GscError::HostError { message: message.into() }
    }

    /// `true` for errors that are scoped to a single thread and must not
    /// poison the rest of the context (spec §7 recovery policy).
    pub fn is_thread_local(&self) -> bool {
        matches!(self, GscError::RuntimeError { .. } | GscError::HostError { .. })
    }
}

pub type GscResult<T> = Result<T, GscError>;
