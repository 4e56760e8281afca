//! file: core/src/ir/program.rs
//! description: the emitted startup program and its procedures.

use serde::{Deserialize, Serialize};

use crate::ir::op::Op;

/// One generated procedure. `groups` is the number of instruction groups
/// the splitter wrote into it, kept for inspection; the interpreter only
/// cares about `ops`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub name: String,
    pub ops: Vec<Op>,
    pub groups: usize,
}

/// A sealed startup program: the entry procedure (`deploy`, always index
/// 0), the array-factory procedure and the continuation procedures, in
/// emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Generated name, `<base-package>.<build-step>$<method><unique-hash>`.
    pub class_name: String,
    pub procs: Vec<Proc>,
}

impl Program {
    pub fn entry(&self) -> &Proc {
        &self.procs[0]
    }

    /// Human-readable listing of every procedure, one op per line.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "program {}", self.class_name);
        for (i, proc) in self.procs.iter().enumerate() {
            let _ = writeln!(out, "  proc #{} {} ({} groups)", i, proc.name, proc.groups);
            for op in &proc.ops {
                let _ = writeln!(out, "    {}", op);
            }
        }
        out
    }

    /// JSON form of the program, for debug tooling. Non-finite float
    /// constants have no JSON form and degrade to null.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
