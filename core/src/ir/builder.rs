//! file: core/src/ir/builder.rs
//! description: procedure and program builders used during emission.

use crate::ir::op::{Local, Op};
use crate::ir::program::{Proc, Program};

/// A per-procedure emission helper: a local slot allocator and an op
/// buffer. Ops can still be appended (or patched) after another procedure
/// has become current; they run in append order when the procedure runs.
pub struct ProcBuilder {
    name: String,
    next_local: usize,
    ops: Vec<Op>,
    groups: usize,
}

impl ProcBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ProcBuilder { name: name.into(), next_local: 0, ops: Vec::new(), groups: 0 }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alloc_local(&mut self) -> Local {
        let l = self.next_local;
        self.next_local += 1;
        l
    }

    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Load a constant into a fresh local and return it.
    pub fn load_const(&mut self, val: crate::ir::op::ConstVal) -> Local {
        let dest = self.alloc_local();
        self.emit(Op::Const { dest, val });
        dest
    }

    pub fn current_len(&self) -> usize {
        self.ops.len()
    }

    pub fn patch_op(&mut self, idx: usize, op: Op) {
        if idx < self.ops.len() {
            self.ops[idx] = op;
        }
    }

    pub fn note_group(&mut self) {
        self.groups += 1;
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    fn finalize(mut self) -> Proc {
        self.ops.push(Op::Ret);
        Proc { name: self.name, ops: self.ops, groups: self.groups }
    }
}

/// Builder for a whole program: an ordered set of open procedures, sealed
/// at once. Procedure index 0 is the entry.
pub struct ProgramBuilder {
    class_name: String,
    procs: Vec<ProcBuilder>,
}

impl ProgramBuilder {
    pub fn new(class_name: impl Into<String>) -> Self {
        ProgramBuilder { class_name: class_name.into(), procs: Vec::new() }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Open a new procedure and return its index.
    pub fn add_proc(&mut self, name: impl Into<String>) -> usize {
        self.procs.push(ProcBuilder::new(name));
        self.procs.len() - 1
    }

    pub fn proc_mut(&mut self, index: usize) -> &mut ProcBuilder {
        &mut self.procs[index]
    }

    pub fn proc_count(&self) -> usize {
        self.procs.len()
    }

    /// Seal every procedure (appending its return) and produce the
    /// program.
    pub fn finish(self) -> Program {
        Program {
            class_name: self.class_name,
            procs: self.procs.into_iter().map(ProcBuilder::finalize).collect(),
        }
    }
}
