//! Linear instruction stream emitted by the compiler (spec §3 `CompiledFunction`,
//! §4.3).
//!
//! Spec §9 explicitly frees implementers to redesign the opcode layout as
//! long as the semantics in §4.3/§4.5 hold. This crate folds "(opcode,
//! operand)" into a single Rust enum per instruction, with the operand
//! carried as typed enum payload instead of a raw byte slice, since there's
//! no wire format here to stay binary-compatible with.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalSlot {
    Level,
    Anim,
    Game,
}

/// Which three call-shapes §4.3 names apply; each carries its own operand
/// kind for the callee.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Resolved within the compiling file's function table at call time
    /// (own definitions plus linked-in includes).
    ByName(String),
    /// `file::function(...)`.
    ByFile { file: String, function: String },
    /// The callee is a value already on the operand stack (a `function`
    /// value) — popped just below the arguments.
    ByValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    PushInt(i64),
    PushFloat(f64),
    PushVec3(f32, f32, f32),
    PushString(i32),
    PushBool(bool),
    PushUndefined,
    /// Pushes the active frame's `self` (the receiver a method call was
    /// invoked on), or `undefined` for a frame entered without one.
    PushSelf,

    LoadLocal(u16),
    StoreLocal(u16),
    /// Pushes a `reference` value bound to this local's slot (spec §4.3,
    /// used for `waittill`'s trailing out-arguments).
    PushLocalRef(u16),

    /// Pops `object`, pushes `object.fields[name] or undefined`.
    LoadField(i32),
    /// Pops `[object, value]` (value on top), sets the field.
    StoreField(i32),
    /// Pops `object`, pushes a `reference` value bound to `object.fields[name]`.
    PushFieldRef(i32),

    /// Pops `[object, index]` (index on top), pushes the indexed value.
    LoadIndexed,
    /// Pops `[object, index, value]` (value on top), stores it.
    StoreIndexed,

    LoadGlobal(GlobalSlot),

    BinaryOp(BinOp),
    UnaryOp(UnOp),

    Jump(usize),
    JumpIfTrue(usize),
    JumpIfFalse(usize),

    /// Regular call. Arguments are already on the stack, left to right.
    Call { callee: Callee, argc: u16 },
    /// `thread f(args)`: same three callee shapes, spawns a new thread
    /// instead of a new frame and leaves `undefined` on the caller stack.
    ThreadCall { callee: Callee, argc: u16 },
    /// `obj f(args)`: pops `self` from below the arguments.
    MethodCall { name: i32, argc: u16 },
    /// `obj thread f(args)`.
    ThreadMethodCall { name: i32, argc: u16 },

    Return,
    Pop,
    Dup,
    /// Duplicates the top two stack entries, preserving order — used to
    /// evaluate an indexed lvalue's object/index exactly once under
    /// compound assignment (spec §4.3: "evaluated once").
    Dup2,

    /// Suspends the thread until `clock >= deadline` (spec §4.5 `wait e`).
    Wait,
    WaitTillFrameEnd,

    /// Allocates a fresh object carrying the default proxy and pushes it
    /// (spec §4.3 "build-object"). Reached via the `spawnstruct()`
    /// call-site convention — see DESIGN.md.
    BuildObject,
}

#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    /// The file it was compiled from — an unqualified call resolves within
    /// this file's own (post-link) function table, not the whole context.
    pub file: String,
    pub instructions: Vec<Instruction>,
    pub parameter_count: u16,
    pub local_count: u16,
    /// `source_map[i]` is the source line of `instructions[i]`.
    pub source_map: Vec<u32>,
}
