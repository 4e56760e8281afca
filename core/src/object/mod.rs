//! Runtime object model: values, heap objects and class descriptions.
//!
//! This is the engine's substitute for reflection. Everything recordable is
//! an [`RtValue`]; everything with identity is an [`ObjRef`]; everything
//! the serializer needs to know about a user class is a
//! [`ClassSpec`](class::ClassSpec) in the [`TypeRegistry`].

pub mod class;
pub mod registry;
pub mod ty;
pub mod value;

pub use class::{ClassSpec, MethodSpec};
pub use registry::TypeRegistry;
pub use ty::{RtType, WildcardBound};
pub use value::{format_duration, parse_duration, HeapObj, ObjRef, ProxyHandle, RtValue};
