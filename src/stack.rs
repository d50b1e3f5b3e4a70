//! The shared operand-stack / locals region carved across all frames (§4.6,
//! §9 "a contiguous slot vector plus a side vector of saved frame metadata").
//!
//! A callee's parameters already sit at the top of the caller's operand
//! stack when a call is made, so `push_frame` never copies them: it simply
//! reinterprets the top `param_slots` entries as the callee's first locals
//! and extends the region with the rest of `max_locals` plus `max_stack`.
//! Everything else about a frame (owning class/method, pc) is the
//! interpreter's concern — §9 notes "the topmost frame's fields are kept in
//! local variables of the dispatch loop for speed", so this module only
//! owns the slot array and the high-water mark.

use std::cell::{Cell, RefCell};

use crate::error::{VmError, VmResult};
use crate::value::Slot;

/// The slot-range bookkeeping `push_frame`/`pop_frame` hand back and forth.
#[derive(Debug, Clone, Copy)]
pub struct FrameMemory {
    /// Index of local 0, coinciding with the first staged argument.
    pub locals_start: usize,
    /// Index of operand-stack slot 0 for this frame.
    pub operand_base: usize,
}

impl FrameMemory {
    pub fn local_index(&self, n: usize) -> usize {
        self.locals_start + n
    }

    pub fn operand_index(&self, top: usize) -> usize {
        self.operand_base + top
    }
}

pub struct Stack {
    slots: RefCell<Vec<Slot>>,
    memory_used: Cell<usize>,
    limit: usize,
}

impl Stack {
    pub fn new(limit: usize) -> Self {
        Stack {
            slots: RefCell::new(Vec::with_capacity(limit.min(4096))),
            memory_used: Cell::new(0),
            limit,
        }
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used.get()
    }

    fn ensure_capacity(&self, upto: usize) {
        let mut slots = self.slots.borrow_mut();
        if slots.len() < upto {
            slots.resize(upto, Slot::Int(0));
        }
    }

    pub fn get(&self, index: usize) -> Slot {
        self.slots.borrow()[index].clone()
    }

    pub fn set(&self, index: usize, value: Slot) {
        self.ensure_capacity(index + 1);
        self.slots.borrow_mut()[index] = value;
    }

    /// Pushes one slot onto the shared top-of-stack: used both to stage a
    /// callee's arguments before `push_frame`, and by the interpreter's
    /// operand-stack helpers within a frame's own `max_stack` region.
    pub fn push_raw(&self, value: Slot) -> VmResult<()> {
        let index = self.memory_used.get();
        if index >= self.limit {
            return Err(VmError::StackOverflow);
        }
        self.ensure_capacity(index + 1);
        self.slots.borrow_mut()[index] = value;
        self.memory_used.set(index + 1);
        Ok(())
    }

    pub fn pop_raw(&self) -> Slot {
        let index = self.memory_used.get() - 1;
        self.memory_used.set(index);
        self.slots.borrow()[index].clone()
    }

    /// Discards the top `count` slots without reading them, e.g. to clear a
    /// frame's staged call arguments once a native thunk has consumed them.
    pub fn pop_n(&self, count: usize) {
        self.memory_used.set(self.memory_used.get() - count);
    }

    /// A read-only snapshot of the top `count` slots, bottom-most first,
    /// used by the native bridge to build its argument list without a
    /// pushed bytecode frame (§4.9).
    pub fn top_slots(&self, count: usize) -> Vec<Slot> {
        let used = self.memory_used.get();
        self.slots.borrow()[used - count..used].to_vec()
    }

    /// §4.6 "Pushing a frame". `param_slots` have already been pushed by the
    /// caller via `push_raw`; they become the callee's first locals in
    /// place, with no copy. For a native method the caller passes
    /// `max_locals == param_slots` and `max_stack == 0` (§4.6 "no extra
    /// locals or operand region").
    pub fn push_frame(&self, param_slots: usize, max_locals: u16, max_stack: u16) -> VmResult<FrameMemory> {
        let memory_before_call = self.memory_used.get();
        debug_assert!(param_slots <= memory_before_call);
        let locals_start = memory_before_call - param_slots;
        let max_locals = max_locals as usize;
        let max_stack = max_stack as usize;
        if max_locals < param_slots {
            return Err(VmError::class_format(
                "max_locals smaller than the parameter slot count",
            ));
        }

        let operand_base = locals_start + max_locals;
        let new_memory_used = operand_base + max_stack;
        if new_memory_used > self.limit {
            return Err(VmError::StackOverflow);
        }

        self.ensure_capacity(new_memory_used);
        {
            let mut slots = self.slots.borrow_mut();
            // Locals past the staged parameters start undefined in the JVM
            // (the verifier guarantees a store before any load); zero them
            // so a buggy read sees a deterministic int rather than garbage.
            for slot in &mut slots[memory_before_call..new_memory_used] {
                *slot = Slot::Int(0);
            }
        }
        self.memory_used.set(new_memory_used);

        Ok(FrameMemory {
            locals_start,
            operand_base,
        })
    }

    /// §4.6 "Popping a frame": restore the caller's high-water mark to
    /// exactly where it stood before the callee's arguments were staged.
    /// The caller is then responsible for pushing 0/1/2 return slots, which
    /// is what makes the §8 "Frame restoration" property hold without this
    /// function needing to know the callee's return type.
    pub fn pop_frame(&self, memory: &FrameMemory) {
        self.memory_used.set(memory.locals_start);
    }

    /// Reconciles the shared high-water mark with a frame's own idea of its
    /// current operand-stack top before any operation that reads
    /// `memory_used` directly, namely `push_frame` for an `invoke*` opcode or
    /// a native dispatch. A frame's push/pop helpers write through
    /// `set`/`get` at explicit indices and never touch `memory_used`
    /// themselves, so the interpreter calls this once per call site with
    /// `frame.operand_base + frame.operand_top`.
    pub fn sync_to(&self, top: usize) {
        self.ensure_capacity(top);
        self.memory_used.set(top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_frame_reuses_staged_arguments_as_locals() {
        let stack = Stack::new(64);
        stack.push_raw(Slot::Int(10)).unwrap();
        stack.push_raw(Slot::Int(20)).unwrap();
        let frame = stack.push_frame(2, 3, 4).unwrap();
        assert_eq!(stack.get(frame.local_index(0)).as_int(), 10);
        assert_eq!(stack.get(frame.local_index(1)).as_int(), 20);
        assert_eq!(frame.operand_base, frame.locals_start + 3);
    }

    #[test]
    fn pop_frame_restores_high_water_mark_plus_return_value() {
        let stack = Stack::new(64);
        stack.push_raw(Slot::Int(1)).unwrap();
        stack.push_raw(Slot::Int(2)).unwrap();
        let pre_call = stack.memory_used();
        let frame = stack.push_frame(2, 2, 4).unwrap();
        stack.pop_frame(&frame);
        assert_eq!(stack.memory_used(), pre_call - 2);
        stack.push_raw(Slot::Int(99)).unwrap(); // caller pushes the ireturn value
        assert_eq!(stack.memory_used(), pre_call - 1);
    }

    #[test]
    fn overflow_is_reported_as_stack_overflow() {
        let stack = Stack::new(4);
        stack.push_raw(Slot::Int(1)).unwrap();
        stack.push_raw(Slot::Int(2)).unwrap();
        assert!(stack.push_frame(2, 2, 4).is_err());
    }

    #[test]
    fn native_frames_carve_only_parameter_slots() {
        let stack = Stack::new(64);
        stack.push_raw(Slot::Int(7)).unwrap();
        let frame = stack.push_frame(1, 1, 0).unwrap();
        assert_eq!(frame.operand_base, frame.locals_start + 1);
        assert_eq!(stack.memory_used(), frame.operand_base);
    }
}
