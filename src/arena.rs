//! Bump-allocated memory regions.
//!
//! Spec §4.1: two arenas per context — *permanent* (ASTs, compiled code,
//! object storage) and *temporary* (scratch, per-compile) — with whole-arena
//! reset instead of per-object deallocation. Allocation is bump-only and
//! signals [`GscError::OutOfMemory`] on exhaustion rather than growing past a
//! configured budget (spec §6: `main_arena_size`, `scratch_arena_size`).
//!
//! Narrowed to a single owner since spec §5 rules out any parallelism: this
//! wraps [`bumpalo::Bump`] directly rather than hand-rolling a bump pointer,
//! since `bumpalo` is a real, widely used crate for exactly this job.

use crate::error::GscError;
use bumpalo::Bump;

/// A single bump region with a soft capacity. `bumpalo` itself grows
/// unbounded; we track bytes handed out against `capacity` so that
/// `OutOfMemory` is observable instead of the process growing without
/// bound.
pub struct Arena {
    bump: Bump,
    capacity: usize,
}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        Arena { bump: Bump::new(), capacity }
    }

    /// Bytes allocated so far, excluding bookkeeping overhead.
    pub fn used(&self) -> usize {
        self.bump.allocated_bytes()
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    fn check_budget(&self, additional: usize) -> Result<(), GscError> {
        if self.used().saturating_add(additional) > self.capacity {
            Err(GscError::OutOfMemory)
        } else {
            Ok(())
        }
    }

    /// Allocates `value` in this arena, returning a reference with the
    /// arena's lifetime.
    pub fn alloc<T>(&self, value: T) -> Result<&T, GscError> {
        self.check_budget(std::mem::size_of::<T>())?;
        Ok(self.bump.alloc(value))
    }

    /// Allocates a `bumpalo::collections::String` built from `s`, used for
    /// scratch text the parser needs to own only for the duration of a
    /// compile (escaped string literals, normalized paths).
    pub fn alloc_str<'a>(&'a self, s: &str) -> Result<&'a str, GscError> {
        self.check_budget(s.len())?;
        Ok(self.bump.alloc_str(s))
    }

    /// Resets the arena, invalidating every reference previously handed out.
    /// Callers must only call this when nothing borrows from the arena
    /// anymore (the temp arena, between compiles).
    pub fn reset(&mut self) {
        self.bump.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_within_budget() {
        let arena = Arena::new(1024);
        let x = arena.alloc(42i32).unwrap();
        assert_eq!(*x, 42);
    }

    #[test]
    fn signals_oom_past_capacity() {
        let arena = Arena::new(8);
        assert!(arena.alloc([0u8; 64]).is_err());
    }

    #[test]
    fn reset_reclaims_budget() {
        let mut arena = Arena::new(64);
        arena.alloc([0u8; 32]).unwrap();
        assert!(arena.available() < 64);
        arena.reset();
        assert_eq!(arena.available(), 64);
    }
}
