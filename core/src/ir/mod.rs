//! Emission layer: the instruction set, procedure builders and the binary
//! program encoder. This is the crate's code-emission library; the
//! recording engine drives it and never touches bytes directly.

pub mod builder;
pub mod bytecode;
pub mod op;
pub mod program;

pub use builder::{ProcBuilder, ProgramBuilder};
pub use bytecode::emit_bytecode;
pub use op::{ConstVal, FactoryKind, Local, Op};
pub use program::{Proc, Program};
