//! file: core/src/vm/mod.rs
//! description: the startup interpreter and its runtime environment.
//!
//! Emitted programs are replayed here: `vm::bytecode` parses the binary
//! form, `vm::exec` runs the procedures against a [`StartupContext`] and a
//! [`RuntimeEnv`]. The environment supplies what the generated program
//! cannot carry: live recorder factories, substitution providers and the
//! class registry.

pub mod bytecode;
pub mod context;
mod exec;

use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::Program;
use crate::object::{RtValue, TypeRegistry};

pub use context::StartupContext;

/// A live recorder instance at startup. The single `dispatch` capability
/// replays every recorded method: implementations match on the method name
/// and receive the reconstructed arguments. Void methods return
/// [`RtValue::Null`].
pub trait StartupRecorder {
    fn dispatch(&mut self, method: &str, args: Vec<RtValue>) -> Result<RtValue, String>;
}

/// Two-way conversion hook for otherwise-unrecordable types. `serialize`
/// runs at build time, `deserialize` at startup; both sides register the
/// provider under the same class name.
pub trait ObjectSubstitution {
    fn serialize(&self, value: &RtValue) -> Result<RtValue, String>;
    fn deserialize(&self, value: RtValue) -> Result<RtValue, String>;
}

type RecorderFactory = Box<dyn Fn(Vec<RtValue>) -> Result<Box<dyn StartupRecorder>, String>>;

/// Everything the interpreter needs besides the program itself.
#[derive(Default)]
pub struct RuntimeEnv {
    registry: TypeRegistry,
    recorders: HashMap<String, RecorderFactory>,
    substitutions: HashMap<String, Box<dyn ObjectSubstitution>>,
}

impl RuntimeEnv {
    pub fn new(registry: TypeRegistry) -> Self {
        RuntimeEnv { registry, recorders: HashMap::new(), substitutions: HashMap::new() }
    }

    /// Register the factory that instantiates a recorder class at startup.
    /// The factory receives the injected constructor arguments, if any.
    pub fn register_recorder<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(Vec<RtValue>) -> Result<Box<dyn StartupRecorder>, String> + 'static,
    {
        self.recorders.insert(class.into(), Box::new(factory));
    }

    /// Register a substitution provider under its class name.
    pub fn register_substitution(
        &mut self,
        provider: impl Into<String>,
        substitution: Box<dyn ObjectSubstitution>,
    ) {
        self.substitutions.insert(provider.into(), substitution);
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn recorder_factory(&self, class: &str) -> Option<&RecorderFactory> {
        self.recorders.get(class)
    }

    pub(crate) fn substitution(&self, provider: &str) -> Option<&dyn ObjectSubstitution> {
        self.substitutions.get(provider).map(|b| b.as_ref())
    }
}

/// The emitted artifact: something that can be deployed once against a
/// startup context.
pub trait StartupTask {
    fn deploy(&self, ctx: &mut StartupContext) -> Result<(), String>;
}

/// A parsed startup program bound to its runtime environment.
pub struct RecordedTask {
    program: Program,
    env: Rc<RuntimeEnv>,
}

impl RecordedTask {
    pub fn new(program: Program, env: Rc<RuntimeEnv>) -> Self {
        RecordedTask { program, env }
    }

    /// Parse the binary form produced by `ir::bytecode::emit_bytecode`.
    pub fn from_bytes(bytes: &[u8], env: Rc<RuntimeEnv>) -> Result<Self, String> {
        let program = bytecode::parse_program(bytes)?;
        Ok(RecordedTask { program, env })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl StartupTask for RecordedTask {
    fn deploy(&self, ctx: &mut StartupContext) -> Result<(), String> {
        exec::run_program(&self.program, ctx, &self.env)
    }
}
