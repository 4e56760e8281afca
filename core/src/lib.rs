//! Core library for the Encore build framework: build-time invocation
//! recording and startup-program emission.
//!
//! Build steps obtain recording proxies for their recorder classes and call
//! methods on them; every call is captured as an instruction and each
//! argument is lowered into a deferred-parameter graph. When a build step
//! finishes, the recorder emits a self-contained startup program (split
//! into bounded procedures sharing one object array) whose execution
//! replays the recorded invocations, bit for bit, against freshly
//! constructed recorder instances.

pub mod error;
pub mod ir;
pub mod object;
pub mod record;
pub mod vm;

pub use error::RecordError;
pub use object::{ClassSpec, HeapObj, ObjRef, RtType, RtValue, TypeRegistry, WildcardBound};
pub use record::{
    BytecodeRecorder, ClassOutput, InMemoryClassOutput, ObjectLoader, RecordingProxy,
};
pub use vm::{
    ObjectSubstitution, RecordedTask, RuntimeEnv, StartupContext, StartupRecorder, StartupTask,
};
