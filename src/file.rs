//! `CompiledFile` (spec §3): a single compiled source file's state, its
//! function table, and the dependency sets the embedder uses to drive a
//! compile fixpoint.

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::opcode::CompiledFunction;

/// Compilation is monotonic: `NotStarted → Done` or `NotStarted → Failed`,
/// at most once per file (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    NotStarted,
    Done,
    Failed,
}

pub struct CompiledFile {
    pub name: String,
    pub state: FileState,
    pub functions: IndexMap<String, Rc<CompiledFunction>>,
    pub includes: HashSet<String>,
    pub file_references: HashSet<String>,
    pub using_animtree: Option<String>,
}

impl CompiledFile {
    pub fn not_started(name: impl Into<String>) -> Self {
        CompiledFile {
            name: name.into(),
            state: FileState::NotStarted,
            functions: IndexMap::new(),
            includes: HashSet::new(),
            file_references: HashSet::new(),
            using_animtree: None,
        }
    }
}
