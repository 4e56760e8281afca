//! file: core/src/record/split.rs
//! description: splits emitted instruction groups across procedures.
//!
//! The emitted program would not fit in one procedure for large recorded
//! histories, so instruction groups are partitioned into continuation
//! procedures of bounded size. Deferred values that cross a procedure
//! boundary are parked in the shared object array; within one procedure a
//! slot is read at most once thanks to the per-procedure cache.

use std::collections::HashMap;

use crate::error::RecordError;
use crate::ir::builder::{ProcBuilder, ProgramBuilder};
use crate::ir::op::{Local, Op};

/// The maximum number of instruction groups per procedure. Group sizes
/// vary, but in practice this keeps every generated procedure comfortably
/// inside the emission layer's size limits.
pub(crate) const MAX_INSTRUCTION_GROUPS: usize = 300;

pub(crate) struct SplitContext<'a> {
    program: &'a mut ProgramBuilder,
    entry: usize,
    current: Option<usize>,
    current_groups: usize,
    continuation_count: usize,
    /// array index -> local already holding that slot in the current proc
    slot_cache: HashMap<usize, Local>,
    next_array_index: usize,
}

impl<'a> SplitContext<'a> {
    pub fn new(program: &'a mut ProgramBuilder, entry: usize) -> Self {
        SplitContext {
            program,
            entry,
            current: None,
            current_groups: 0,
            continuation_count: 0,
            slot_cache: HashMap::new(),
            next_array_index: 0,
        }
    }

    /// Write one instruction group. The group is atomic: everything the
    /// closure emits lands in a single procedure, and a procedure switch
    /// can only happen between groups.
    pub fn write_group<F>(&mut self, f: F) -> Result<(), RecordError>
    where
        F: FnOnce(&mut SplitContext<'a>) -> Result<(), RecordError>,
    {
        let cur = self.ensure_current();
        self.current_groups += 1;
        self.program.proc_mut(cur).note_group();
        f(self)
    }

    fn ensure_current(&mut self) -> usize {
        match self.current {
            Some(cur) if self.current_groups < MAX_INSTRUCTION_GROUPS => cur,
            _ => self.new_method(),
        }
    }

    fn new_method(&mut self) -> usize {
        let name = format!("deploy_{}", self.continuation_count);
        self.continuation_count += 1;
        let idx = self.program.add_proc(name);
        self.program.proc_mut(self.entry).emit(Op::CallProc { index: idx });
        self.current = Some(idx);
        self.current_groups = 0;
        self.slot_cache.clear();
        idx
    }

    /// Index of the procedure groups are currently written into.
    pub fn current_proc(&self) -> usize {
        // write_group always establishes a current proc before running its
        // closure, which is the only caller context for this.
        self.current.unwrap_or(self.entry)
    }

    pub fn proc_mut_current(&mut self) -> &mut ProcBuilder {
        let cur = self.current_proc();
        self.program.proc_mut(cur)
    }

    /// Append to an arbitrary (possibly no longer current) procedure;
    /// used for stash-writes into the procedure that created a value.
    pub fn proc_mut(&mut self, index: usize) -> &mut ProcBuilder {
        self.program.proc_mut(index)
    }

    /// Assign the next shared-array slot, in first-cross-procedure-use
    /// order.
    pub fn alloc_array_index(&mut self) -> usize {
        let idx = self.next_array_index;
        self.next_array_index += 1;
        idx
    }

    pub fn array_count(&self) -> usize {
        self.next_array_index
    }

    pub fn cached_slot(&self, index: usize) -> Option<Local> {
        self.slot_cache.get(&index).copied()
    }

    pub fn cache_slot(&mut self, index: usize, local: Local) {
        self.slot_cache.insert(index, local);
    }
}
