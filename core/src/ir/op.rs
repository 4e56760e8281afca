//! file: core/src/ir/op.rs
//! description: the startup-program instruction set.
//!
//! One `Op` corresponds to one primitive of the emission layer: load a
//! constant, construct an object, write a shared-array slot, invoke a
//! recorder method. Locals are per-procedure slots; the shared object array
//! and the startup context are ambient state of the running program.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Local = usize;

/// Sentinel constructor index meaning "the no-arg constructor", used when
/// the class is only known by name at emission time.
pub const NO_ARG_CTOR: usize = u32::MAX as usize;

/// An inline constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstVal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
}

/// Well-known factory calls: the empty/singleton container family, the
/// optional constructors and the unbounded wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactoryKind {
    EmptyList,
    EmptySet,
    EmptySortedSet,
    EmptyMap,
    EmptySortedMap,
    SingletonList,
    SingletonSet,
    SingletonMap,
    OptionalOf,
    OptionalEmpty,
    UnboundedWildcard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Const { dest: Local, val: ConstVal },
    /// Resolve a class reference by name through the runtime registry.
    LoadClass { dest: Local, name: String },
    /// `valueOf`-style enum lookup on the declaring class.
    EnumValue { dest: Local, class: String, variant: String },
    /// Reconstruct a URL from its external form; malformed input is a
    /// startup error.
    ParseUrl { dest: Local, text: String },
    ParseDuration { dest: Local, text: String },
    CtxGet { dest: Local, key: String },
    CtxPut { key: String, src: Local },
    SetStepName { name: String },
    /// Allocate the shared object array; only ever appears in the
    /// dedicated array-factory procedure.
    MakeSharedArray { len: usize },
    SharedRead { dest: Local, index: usize, cast: Option<String> },
    SharedWrite { index: usize, src: Local },
    /// Invoke constructor `ctor` of `class` (an index into the registered
    /// constructor list; ignored for container classes).
    New { dest: Local, class: String, ctor: usize, args: Vec<Local> },
    Factory { dest: Local, kind: FactoryKind, args: Vec<Local> },
    NewArray { dest: Local, component: String, len: usize },
    ArrayWrite { array: Local, index: usize, src: Local },
    /// Invoke the generated annotation-literal constructor; arguments are
    /// member values in declaration order.
    NewAnnotation { dest: Local, class: String, args: Vec<Local> },
    WrapRuntimeValue { dest: Local, src: Local },
    /// Run a substitution provider's deserialize side.
    Deserialize { dest: Local, provider: String, src: Local },
    MakeParameterized { dest: Local, raw: Local, args: Vec<Local>, owner: Option<Local> },
    MakeGenericArray { dest: Local, component: Local },
    MakeWildcard { dest: Local, upper: bool, bound: Local },
    Add { target: Local, item: Local },
    Put { target: Local, key: Local, value: Local },
    SetProperty { target: Local, name: String, src: Local },
    SetField { target: Local, name: String, src: Local },
    GetProperty { dest: Local, target: Local, name: String },
    Invoke {
        dest: Option<Local>,
        recorder: Local,
        class: String,
        method: String,
        args: Vec<Local>,
    },
    /// Run another procedure of the same program to completion.
    CallProc { index: usize },
    Ret,
}

fn join(locals: &[Local]) -> String {
    locals.iter().map(|l| format!("l{}", l)).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const { dest, val } => write!(f, "Const l{} <- {:?}", dest, val),
            Op::LoadClass { dest, name } => write!(f, "LoadClass l{} <- {}", dest, name),
            Op::EnumValue { dest, class, variant } => {
                write!(f, "EnumValue l{} <- {}::{}", dest, class, variant)
            }
            Op::ParseUrl { dest, text } => write!(f, "ParseUrl l{} <- {:?}", dest, text),
            Op::ParseDuration { dest, text } => {
                write!(f, "ParseDuration l{} <- {:?}", dest, text)
            }
            Op::CtxGet { dest, key } => write!(f, "CtxGet l{} <- ctx[{:?}]", dest, key),
            Op::CtxPut { key, src } => write!(f, "CtxPut ctx[{:?}] <- l{}", key, src),
            Op::SetStepName { name } => write!(f, "SetStepName {:?}", name),
            Op::MakeSharedArray { len } => write!(f, "MakeSharedArray [{}]", len),
            Op::SharedRead { dest, index, cast } => match cast {
                Some(c) => write!(f, "SharedRead l{} <- shared[{}] as {}", dest, index, c),
                None => write!(f, "SharedRead l{} <- shared[{}]", dest, index),
            },
            Op::SharedWrite { index, src } => {
                write!(f, "SharedWrite shared[{}] <- l{}", index, src)
            }
            Op::New { dest, class, ctor, args } => {
                write!(f, "New l{} <- {}#{}({})", dest, class, ctor, join(args))
            }
            Op::Factory { dest, kind, args } => {
                write!(f, "Factory l{} <- {:?}({})", dest, kind, join(args))
            }
            Op::NewArray { dest, component, len } => {
                write!(f, "NewArray l{} <- {}[{}]", dest, component, len)
            }
            Op::ArrayWrite { array, index, src } => {
                write!(f, "ArrayWrite l{}[{}] <- l{}", array, index, src)
            }
            Op::NewAnnotation { dest, class, args } => {
                write!(f, "NewAnnotation l{} <- @{}({})", dest, class, join(args))
            }
            Op::WrapRuntimeValue { dest, src } => {
                write!(f, "WrapRuntimeValue l{} <- l{}", dest, src)
            }
            Op::Deserialize { dest, provider, src } => {
                write!(f, "Deserialize l{} <- {}(l{})", dest, provider, src)
            }
            Op::MakeParameterized { dest, raw, args, owner } => {
                write!(f, "MakeParameterized l{} <- l{}<{}>", dest, raw, join(args))?;
                if let Some(o) = owner {
                    write!(f, " owner l{}", o)?;
                }
                Ok(())
            }
            Op::MakeGenericArray { dest, component } => {
                write!(f, "MakeGenericArray l{} <- l{}[]", dest, component)
            }
            Op::MakeWildcard { dest, upper, bound } => write!(
                f,
                "MakeWildcard l{} <- ? {} l{}",
                dest,
                if *upper { "extends" } else { "super" },
                bound
            ),
            Op::Add { target, item } => write!(f, "Add l{} += l{}", target, item),
            Op::Put { target, key, value } => {
                write!(f, "Put l{}[l{}] <- l{}", target, key, value)
            }
            Op::SetProperty { target, name, src } => {
                write!(f, "SetProperty l{}.{} <- l{}", target, name, src)
            }
            Op::SetField { target, name, src } => {
                write!(f, "SetField l{}.{} <- l{}", target, name, src)
            }
            Op::GetProperty { dest, target, name } => {
                write!(f, "GetProperty l{} <- l{}.{}", dest, target, name)
            }
            Op::Invoke { dest, recorder, class, method, args } => {
                match dest {
                    Some(d) => write!(f, "Invoke l{} <- ", d)?,
                    None => write!(f, "Invoke ")?,
                }
                write!(f, "l{}.{}::{}({})", recorder, class, method, join(args))
            }
            Op::CallProc { index } => write!(f, "CallProc #{}", index),
            Op::Ret => write!(f, "Ret"),
        }
    }
}
