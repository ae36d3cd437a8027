//! Cross-file `#include` resolution (spec §4.4).
//!
//! Runs after a file reaches [`FileState::Done`][crate::file::FileState::Done]:
//! walks its `includes`, and for every included file that is itself `Done`,
//! copies in any function name not already present. Already-defined names
//! win — no override, no diagnostic. Fixpoint: one include pass may make a
//! file visible that a previous pass, run before that include finished
//! compiling, could not yet see.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::file::{CompiledFile, FileState};
use crate::opcode::CompiledFunction;

/// Runs include resolution to a fixpoint over every currently `Done` file.
/// Returns `true` if any function table changed, so callers can decide
/// whether to re-run after compiling more files.
pub fn link(files: &mut IndexMap<String, CompiledFile>) -> bool {
    let mut any_changed = false;
    loop {
        let mut changed = false;
        let names: Vec<String> = files.keys().cloned().collect();
        for name in &names {
            if files[name].state != FileState::Done {
                continue;
            }
            let includes: Vec<String> = files[name].includes.iter().cloned().collect();
            for include in includes {
                let imported: Vec<(String, Rc<CompiledFunction>)> = match files.get(&include) {
                    Some(f) if f.state == FileState::Done => {
                        f.functions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                    }
                    _ => continue,
                };
                let file = files.get_mut(name).expect("name came from files.keys()");
                for (fname, func) in imported {
                    if !file.functions.contains_key(&fname) {
                        file.functions.insert(fname, func);
                        changed = true;
                    }
                }
            }
        }
        any_changed |= changed;
        if !changed {
            break;
        }
    }
    any_changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::strtab::StringTable;

    fn compiled(name: &str, source: &str, includes: &[&str]) -> CompiledFile {
        let mut strtab = StringTable::new();
        let out = compiler::compile_file(name, source, &mut strtab).unwrap();
        let mut f = CompiledFile::not_started(name);
        f.state = FileState::Done;
        f.functions = out.functions;
        f.includes = includes.iter().map(|s| s.to_string()).collect();
        f
    }

    #[test]
    fn included_function_is_imported_when_not_already_defined() {
        let mut files = IndexMap::new();
        files.insert("a".to_string(), compiled("a", "g(){ return 1; }", &[]));
        files.insert("b".to_string(), compiled("b", "h(){ return 2; }", &["a"]));
        link(&mut files);
        assert!(files["b"].functions.contains_key("g"));
    }

    #[test]
    fn existing_definition_is_not_overridden() {
        let mut files = IndexMap::new();
        files.insert("a".to_string(), compiled("a", "g(){ return 1; }", &[]));
        files.insert("b".to_string(), compiled("b", "g(){ return 2; }", &["a"]));
        link(&mut files);
        let result = files["b"].functions["g"].instructions.len();
        let original = compiled("b", "g(){ return 2; }", &[]).functions["g"].instructions.len();
        assert_eq!(result, original);
    }

    #[test]
    fn fixpoint_propagates_through_a_chain_of_includes() {
        let mut files = IndexMap::new();
        files.insert("a".to_string(), compiled("a", "g(){ return 1; }", &[]));
        files.insert("b".to_string(), compiled("b", "h(){ return 2; }", &["a"]));
        files.insert("c".to_string(), compiled("c", "k(){ return 3; }", &["b"]));
        link(&mut files);
        assert!(files["c"].functions.contains_key("h"));
        assert!(files["c"].functions.contains_key("g"));
    }
}
