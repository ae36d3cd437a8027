//! AST → linear instructions (spec §4.3).
//!
//! One [`FunctionCompiler`] per function: a flat `Vec<Instruction>` with a
//! parallel `source_map`, symbol table for locals assigned lazily on first
//! sight (GSC has no variable declarations — a name becomes a local the
//! first time it's referenced), and a stack of break/continue patch lists
//! for loops and switches.

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::*;
use crate::error::{GscError, GscResult};
use crate::opcode::{BinOp, Callee, CompiledFunction, GlobalSlot, Instruction, UnOp};
use crate::parser;
use crate::strtab::StringTable;

pub struct CompileOutput {
    pub functions: IndexMap<String, Rc<CompiledFunction>>,
    pub includes: HashSet<String>,
    pub file_references: HashSet<String>,
    pub using_animtree: Option<String>,
}

/// Parses then lowers every function in `source`. A duplicate function name
/// is caught by the parser; anything else wrong in a function's body is
/// caught here and reported with the file name plus the offending line.
pub fn compile_file(filename: &str, source: &str, strtab: &mut StringTable) -> GscResult<CompileOutput> {
    let parsed = parser::parse(filename, source)?;
    let mut functions = IndexMap::new();
    for func in &parsed.ast.functions {
        let compiled = FunctionCompiler::new(filename, strtab).compile(func)?;
        functions.insert(func.name.clone(), Rc::new(compiled));
    }
    Ok(CompileOutput {
        functions,
        includes: parsed.includes,
        file_references: parsed.file_references,
        using_animtree: parsed.using_animtree,
    })
}

enum BreakScope {
    Loop { break_patches: Vec<usize>, continue_patches: Vec<usize> },
    Switch { break_patches: Vec<usize> },
}

struct FunctionCompiler<'s> {
    filename: String,
    strtab: &'s mut StringTable,
    locals: IndexMap<String, u16>,
    instructions: Vec<Instruction>,
    source_map: Vec<u32>,
    scopes: Vec<BreakScope>,
}

impl<'s> FunctionCompiler<'s> {
    fn new(filename: &str, strtab: &'s mut StringTable) -> Self {
        FunctionCompiler {
            filename: filename.to_string(),
            strtab,
            locals: IndexMap::new(),
            instructions: Vec::new(),
            source_map: Vec::new(),
            scopes: Vec::new(),
        }
    }

    fn err(&self, line: u32, message: impl Into<String>) -> GscError {
        GscError::compile(self.filename.clone(), line, message)
    }

    fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        self.instructions.push(instr);
        self.source_map.push(line);
        self.instructions.len() - 1
    }

    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn patch_jump(&mut self, at: usize, target: usize) {
        self.instructions[at] = match &self.instructions[at] {
            Instruction::Jump(_) => Instruction::Jump(target),
            Instruction::JumpIfTrue(_) => Instruction::JumpIfTrue(target),
            Instruction::JumpIfFalse(_) => Instruction::JumpIfFalse(target),
            other => panic!("patch_jump on non-jump instruction {other:?}"),
        };
    }

    fn local_slot(&mut self, name: &str) -> u16 {
        if let Some(&idx) = self.locals.get(name) {
            return idx;
        }
        let idx = self.locals.len() as u16;
        self.locals.insert(name.to_string(), idx);
        idx
    }

    /// A fresh local slot under a name the lexer can never produce, used to
    /// stash an assignment's value across the `StoreField`/`StoreIndexed`
    /// that consumes it, so the assignment expression can still yield that
    /// value (spec §4.2: assignment is an expression production).
    fn temp_slot(&mut self) -> u16 {
        let name = format!("$tmp{}", self.locals.len());
        self.local_slot(&name)
    }

    fn compile(mut self, func: &FunctionDecl) -> GscResult<CompiledFunction> {
        for p in &func.params {
            self.local_slot(p);
        }
        for stmt in &func.body {
            self.compile_stmt(stmt)?;
        }
        // Implicit `return;` at the end of a function body.
        self.emit(Instruction::PushUndefined, func.line);
        self.emit(Instruction::Return, func.line);
        Ok(CompiledFunction {
            name: func.name.clone(),
            file: self.filename.clone(),
            instructions: self.instructions,
            parameter_count: func.params.len() as u16,
            local_count: self.locals.len() as u16,
            source_map: self.source_map,
        })
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> GscResult<()> {
        for s in stmts {
            self.compile_stmt(s)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> GscResult<()> {
        match stmt {
            Stmt::Block(stmts) => self.compile_block(stmts),
            Stmt::Empty => Ok(()),
            Stmt::Expr(e) => {
                let line = 0;
                self.compile_expr(e, line)?;
                self.emit(Instruction::Pop, line);
                Ok(())
            }
            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_expr(cond, 0)?;
                let jf = self.emit(Instruction::JumpIfFalse(0), 0);
                self.compile_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    let jend = self.emit(Instruction::Jump(0), 0);
                    self.patch_jump(jf, self.here());
                    self.compile_stmt(else_branch)?;
                    let end = self.here();
                    self.patch_jump(jend, end);
                } else {
                    let end = self.here();
                    self.patch_jump(jf, end);
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                let cond_label = self.here();
                self.compile_expr(cond, 0)?;
                let jf = self.emit(Instruction::JumpIfFalse(0), 0);
                self.scopes.push(BreakScope::Loop { break_patches: Vec::new(), continue_patches: Vec::new() });
                self.compile_stmt(body)?;
                let scope = self.scopes.pop().unwrap();
                self.emit(Instruction::Jump(cond_label), 0);
                let end = self.here();
                self.patch_jump(jf, end);
                if let BreakScope::Loop { break_patches, continue_patches } = scope {
                    for p in break_patches {
                        self.patch_jump(p, end);
                    }
                    for p in continue_patches {
                        self.patch_jump(p, cond_label);
                    }
                }
                Ok(())
            }
            Stmt::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.compile_stmt(init)?;
                }
                let cond_label = self.here();
                let jf = cond.as_ref().map(|c| {
                    self.compile_expr(c, 0).expect("for-condition codegen");
                    self.emit(Instruction::JumpIfFalse(0), 0)
                });
                self.scopes.push(BreakScope::Loop { break_patches: Vec::new(), continue_patches: Vec::new() });
                self.compile_stmt(body)?;
                let scope = self.scopes.pop().unwrap();
                let step_label = self.here();
                if let Some(step) = step {
                    self.compile_expr(step, 0)?;
                    self.emit(Instruction::Pop, 0);
                }
                self.emit(Instruction::Jump(cond_label), 0);
                let end = self.here();
                if let Some(jf) = jf {
                    self.patch_jump(jf, end);
                }
                if let BreakScope::Loop { break_patches, continue_patches } = scope {
                    for p in break_patches {
                        self.patch_jump(p, end);
                    }
                    for p in continue_patches {
                        self.patch_jump(p, step_label);
                    }
                }
                Ok(())
            }
            Stmt::Switch { scrutinee, cases } => self.compile_switch(scrutinee, cases),
            Stmt::Break => {
                let at = self.emit(Instruction::Jump(0), 0);
                match self.scopes.last_mut() {
                    Some(BreakScope::Loop { break_patches, .. }) => break_patches.push(at),
                    Some(BreakScope::Switch { break_patches }) => break_patches.push(at),
                    None => return Err(self.err(0, "'break' outside loop or switch")),
                }
                Ok(())
            }
            Stmt::Continue => {
                let at = self.emit(Instruction::Jump(0), 0);
                let found = self.scopes.iter_mut().rev().find_map(|s| match s {
                    BreakScope::Loop { continue_patches, .. } => Some(continue_patches),
                    BreakScope::Switch { .. } => None,
                });
                match found {
                    Some(patches) => patches.push(at),
                    None => return Err(self.err(0, "'continue' outside loop")),
                }
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.compile_expr(e, 0)?,
                    None => {
                        self.emit(Instruction::PushUndefined, 0);
                    }
                }
                self.emit(Instruction::Return, 0);
                Ok(())
            }
            Stmt::Wait(e) => {
                self.compile_expr(e, 0)?;
                self.emit(Instruction::Wait, 0);
                Ok(())
            }
            Stmt::WaitTillFrameEnd => {
                self.emit(Instruction::WaitTillFrameEnd, 0);
                Ok(())
            }
        }
    }

    fn compile_switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase]) -> GscResult<()> {
        self.compile_expr(scrutinee, 0)?;
        self.scopes.push(BreakScope::Switch { break_patches: Vec::new() });

        enum Target {
            CaseEntry(usize),
            End,
        }
        let mut entry_points = vec![0usize; cases.len()];
        let mut miss_patches: Vec<(usize, Target)> = Vec::new();
        let mut fallthrough_patches: Vec<(usize, Target)> = Vec::new();

        for (i, case) in cases.iter().enumerate() {
            entry_points[i] = self.here();
            if let Some(value) = &case.value {
                self.emit(Instruction::Dup, case.line);
                self.compile_expr(value, case.line)?;
                self.emit(Instruction::BinaryOp(BinOp::Eq), case.line);
                let jf = self.emit(Instruction::JumpIfFalse(0), case.line);
                let target = if i + 1 < cases.len() { Target::CaseEntry(i + 1) } else { Target::End };
                miss_patches.push((jf, target));
            }
            self.compile_block(&case.body)?;
            let falls_through = !matches!(case.body.last(), Some(Stmt::Break) | Some(Stmt::Return(_)) | Some(Stmt::Continue));
            if falls_through && i + 1 < cases.len() {
                let j = self.emit(Instruction::Jump(0), case.line);
                fallthrough_patches.push((j, Target::CaseEntry(i + 1)));
            }
        }

        let end = self.here();
        for (at, target) in miss_patches.into_iter().chain(fallthrough_patches) {
            let resolved = match target {
                Target::CaseEntry(i) => entry_points[i],
                Target::End => end,
            };
            self.patch_jump(at, resolved);
        }

        self.emit(Instruction::Pop, 0); // discard the scrutinee
        let scope = self.scopes.pop().unwrap();
        let after = self.here();
        if let BreakScope::Switch { break_patches } = scope {
            for p in break_patches {
                self.patch_jump(p, after);
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr, line: u32) -> GscResult<()> {
        match expr {
            Expr::Int(v) => {
                self.emit(Instruction::PushInt(*v), line);
            }
            Expr::Float(v) => {
                self.emit(Instruction::PushFloat(*v), line);
            }
            Expr::Vec3(x, y, z) => {
                self.emit(Instruction::PushVec3(*x, *y, *z), line);
            }
            Expr::Str(s) => {
                let id = self.strtab.intern(s);
                self.emit(Instruction::PushString(id), line);
            }
            Expr::Bool(b) => {
                self.emit(Instruction::PushBool(*b), line);
            }
            Expr::Undefined => {
                self.emit(Instruction::PushUndefined, line);
            }
            Expr::Identifier(name) => {
                if name == "self" {
                    self.emit(Instruction::PushSelf, line);
                } else if let Some(g) = global_slot(name) {
                    self.emit(Instruction::LoadGlobal(g), line);
                } else {
                    let idx = self.local_slot(name);
                    self.emit(Instruction::LoadLocal(idx), line);
                }
            }
            Expr::Member { base, field } => {
                self.compile_expr(base, line)?;
                let id = self.strtab.intern(field);
                self.emit(Instruction::LoadField(id), line);
            }
            Expr::Index { base, index } => {
                self.compile_expr(base, line)?;
                self.compile_expr(index, line)?;
                self.emit(Instruction::LoadIndexed, line);
            }
            Expr::Unary { op, expr } => {
                self.compile_expr(expr, line)?;
                let op = match op {
                    UnaryOp::Neg => UnOp::Neg,
                    UnaryOp::Not => UnOp::Not,
                };
                self.emit(Instruction::UnaryOp(op), line);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs, line)?;
                self.compile_expr(rhs, line)?;
                self.emit(Instruction::BinaryOp(to_binop(*op)), line);
            }
            Expr::Reference(inner) => self.compile_reference(inner, line)?,
            Expr::Assign { target, op, value } => self.compile_assign(target, *op, value, line)?,
            Expr::Call { target, args, threaded } => self.compile_call(target, args, *threaded, line)?,
        }
        Ok(())
    }

    fn compile_reference(&mut self, target: &Expr, line: u32) -> GscResult<()> {
        match target {
            Expr::Identifier(name) if global_slot(name).is_none() => {
                let idx = self.local_slot(name);
                self.emit(Instruction::PushLocalRef(idx), line);
                Ok(())
            }
            Expr::Member { base, field } => {
                self.compile_expr(base, line)?;
                let id = self.strtab.intern(field);
                self.emit(Instruction::PushFieldRef(id), line);
                Ok(())
            }
            other => Err(self.err(line, format!("cannot take a reference to {other:?}"))),
        }
    }

    fn compile_assign(&mut self, target: &Expr, op: AssignOp, value: &Expr, line: u32) -> GscResult<()> {
        match target {
            Expr::Identifier(name) => {
                if global_slot(name).is_some() {
                    return Err(self.err(line, format!("cannot assign to global '{name}'")));
                }
                let idx = self.local_slot(name);
                match op.as_binary() {
                    None => {
                        self.compile_expr(value, line)?;
                    }
                    Some(binop) => {
                        self.emit(Instruction::LoadLocal(idx), line);
                        self.compile_expr(value, line)?;
                        self.emit(Instruction::BinaryOp(to_binop(binop)), line);
                    }
                }
                self.emit(Instruction::Dup, line);
                self.emit(Instruction::StoreLocal(idx), line);
                Ok(())
            }
            Expr::Member { base, field } => {
                let id = self.strtab.intern(field);
                self.compile_expr(base, line)?;
                match op.as_binary() {
                    None => {
                        self.compile_expr(value, line)?;
                    }
                    Some(binop) => {
                        self.emit(Instruction::Dup, line);
                        self.emit(Instruction::LoadField(id), line);
                        self.compile_expr(value, line)?;
                        self.emit(Instruction::BinaryOp(to_binop(binop)), line);
                    }
                }
                // Stash a copy of the value below the store so the
                // assignment still yields it, the same way the identifier
                // case's `Dup` does.
                let tmp = self.temp_slot();
                self.emit(Instruction::Dup, line);
                self.emit(Instruction::StoreLocal(tmp), line);
                self.emit(Instruction::StoreField(id), line);
                self.emit(Instruction::LoadLocal(tmp), line);
                Ok(())
            }
            Expr::Index { base, index } => {
                self.compile_expr(base, line)?;
                self.compile_expr(index, line)?;
                match op.as_binary() {
                    None => {
                        self.compile_expr(value, line)?;
                    }
                    Some(binop) => {
                        self.emit(Instruction::Dup2, line);
                        self.emit(Instruction::LoadIndexed, line);
                        self.compile_expr(value, line)?;
                        self.emit(Instruction::BinaryOp(to_binop(binop)), line);
                    }
                }
                let tmp = self.temp_slot();
                self.emit(Instruction::Dup, line);
                self.emit(Instruction::StoreLocal(tmp), line);
                self.emit(Instruction::StoreIndexed, line);
                self.emit(Instruction::LoadLocal(tmp), line);
                Ok(())
            }
            other => Err(self.err(line, format!("invalid assignment target {other:?}"))),
        }
    }

    fn compile_call(&mut self, target: &CallTarget, args: &[Expr], threaded: bool, line: u32) -> GscResult<()> {
        if let CallTarget::ByName(name) = target {
            if name == "spawnstruct" && args.is_empty() && !threaded {
                self.emit(Instruction::BuildObject, line);
                return Ok(());
            }
        }

        match target {
            CallTarget::ByName(name) => {
                for a in args {
                    self.compile_expr(a, line)?;
                }
                let callee = Callee::ByName(name.clone());
                self.emit(if threaded { Instruction::ThreadCall { callee, argc: args.len() as u16 } } else { Instruction::Call { callee, argc: args.len() as u16 } }, line);
            }
            CallTarget::ByFile { file, function } => {
                for a in args {
                    self.compile_expr(a, line)?;
                }
                let callee = Callee::ByFile { file: file.clone(), function: function.clone() };
                self.emit(if threaded { Instruction::ThreadCall { callee, argc: args.len() as u16 } } else { Instruction::Call { callee, argc: args.len() as u16 } }, line);
            }
            CallTarget::ByValue(callee_expr) => {
                self.compile_expr(callee_expr, line)?;
                for a in args {
                    self.compile_expr(a, line)?;
                }
                self.emit(if threaded { Instruction::ThreadCall { callee: Callee::ByValue, argc: args.len() as u16 } } else { Instruction::Call { callee: Callee::ByValue, argc: args.len() as u16 } }, line);
            }
            CallTarget::Method { receiver, function } => {
                self.compile_expr(receiver, line)?;
                let is_waittill = function == "waittill" || function == "waittillmatch";
                for (i, a) in args.iter().enumerate() {
                    if is_waittill && i > 0 {
                        let target = if let Expr::Reference(inner) = a { inner.as_ref() } else { a };
                        self.compile_reference(target, line)?;
                    } else {
                        self.compile_expr(a, line)?;
                    }
                }
                let name = self.strtab.intern(function);
                self.emit(if threaded { Instruction::ThreadMethodCall { name, argc: args.len() as u16 } } else { Instruction::MethodCall { name, argc: args.len() as u16 } }, line);
            }
        }
        Ok(())
    }
}

fn global_slot(name: &str) -> Option<GlobalSlot> {
    match name {
        "level" => Some(GlobalSlot::Level),
        "anim" => Some(GlobalSlot::Anim),
        "game" => Some(GlobalSlot::Game),
        _ => None,
    }
}

fn to_binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Ne => BinOp::Ne,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::Le => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::Ge => BinOp::Ge,
        BinaryOp::And => BinOp::And,
        BinaryOp::Or => BinOp::Or,
    }
}
