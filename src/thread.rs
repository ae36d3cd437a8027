//! Script threads (spec §3 `Thread`, §5).
//!
//! Each thread is an explicit state machine rather than a host-language
//! coroutine (spec §9: "the scheduler must be able to inspect, reorder, and
//! drop threads without cooperation"), carrying its own frame stack and
//! operand stack.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::evaluation_stack::EvaluationStack;
use crate::opcode::CompiledFunction;
use crate::value::{Locals, ObjectRef, Reference, Value};

pub type ThreadId = u32;

/// A per-call activation record (Glossary: "Frame").
pub struct Frame {
    pub function: Rc<CompiledFunction>,
    pub ip: usize,
    pub locals: Locals,
    pub this: Option<ObjectRef>,
    pub nargs: u16,
}

impl Frame {
    pub fn new(function: Rc<CompiledFunction>, this: Option<ObjectRef>, args: Vec<Value>) -> Self {
        let nargs = args.len() as u16;
        let mut slots = args;
        slots.resize(function.local_count as usize, Value::Undefined);
        Frame { function, ip: 0, locals: Rc::new(std::cell::RefCell::new(slots)), this, nargs }
    }
}

/// What a thread is waiting on when it is not `Runnable` (spec §3).
pub enum ThreadState {
    Runnable,
    WaitingTime(f64),
    WaitingEvent(WaittillSpec),
    /// Woken strictly after all other runnable work in the tick (spec §4.5).
    WaitingFrameEnd,
    Done,
    Error(crate::error::GscError),
}

/// The receiver/name/out-references a suspended `waittill`/`waittillmatch`
/// call is blocked on (spec §4.6).
pub struct WaittillSpec {
    pub object: ObjectRef,
    pub name_id: i32,
    pub out_refs: SmallVec<[Reference; 4]>,
}

pub struct Thread {
    pub id: ThreadId,
    pub frames: Vec<Frame>,
    pub operand_stack: EvaluationStack,
    pub state: ThreadState,
    /// `(owner, name_id)` pairs registered by `self endon("name")` — the
    /// owner is recorded because `notify` must match the exact object the
    /// endon was registered against, not just the name (spec §4.6).
    pub endon_events: SmallVec<[(ObjectRef, i32); 4]>,
    /// Monotonically increasing; used to preserve "suspension order" for
    /// fair waking (spec §5: notify/runnable ordering).
    pub sequence: u64,
}

impl Thread {
    pub fn new(id: ThreadId, sequence: u64, entry: Frame) -> Self {
        Thread {
            id,
            frames: vec![entry],
            operand_stack: EvaluationStack::new(),
            state: ThreadState::Runnable,
            endon_events: SmallVec::new(),
            sequence,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ThreadState::Done | ThreadState::Error(_))
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }
}
