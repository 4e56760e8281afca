//! file: core/src/object/ty.rs
//! description: framework type names and the reflective type model.
//!
//! Types are carried as plain strings throughout the engine: builtin names
//! for scalars and containers, dotted names for user classes, a `[]` suffix
//! for arrays and `runtime-value<T>` for the wrapper. `RtType` models the
//! composite (parameterized / generic-array / wildcard) types that can be
//! recorded as values and rebuilt at startup.

use std::fmt;

/// Builtin type names understood by the engine without a registry entry.
pub mod names {
    pub const VOID: &str = "void";
    pub const OBJECT: &str = "object";
    pub const BOOL: &str = "bool";
    pub const INT: &str = "int";
    pub const FLOAT: &str = "float";
    pub const CHAR: &str = "char";
    pub const STRING: &str = "string";
    pub const DURATION: &str = "duration";
    pub const URL: &str = "url";
    pub const CLASS: &str = "class";
    pub const TYPE: &str = "type";
    pub const OPTION: &str = "option";
    pub const RUNTIME_VALUE: &str = "runtime-value";

    pub const LIST: &str = "list";
    pub const SET: &str = "set";
    pub const SORTED_SET: &str = "sorted-set";
    pub const MAP: &str = "map";
    pub const SORTED_MAP: &str = "sorted-map";

    pub const ARRAY_LIST: &str = "array-list";
    pub const LINKED_HASH_SET: &str = "linked-hash-set";
    pub const TREE_SET: &str = "tree-set";
    pub const LINKED_HASH_MAP: &str = "linked-hash-map";
    pub const TREE_MAP: &str = "tree-map";

    pub const EMPTY_LIST: &str = "empty-list";
    pub const EMPTY_SET: &str = "empty-set";
    pub const EMPTY_SORTED_SET: &str = "empty-sorted-set";
    pub const EMPTY_MAP: &str = "empty-map";
    pub const EMPTY_SORTED_MAP: &str = "empty-sorted-map";
    pub const SINGLETON_LIST: &str = "singleton-list";
    pub const SINGLETON_SET: &str = "singleton-set";
    pub const SINGLETON_MAP: &str = "singleton-map";
}

/// True for the scalar names that load as direct literals.
pub fn is_primitive(name: &str) -> bool {
    matches!(name, names::BOOL | names::INT | names::FLOAT | names::CHAR)
}

/// True for any list/set shaped name, interface or concrete.
pub fn is_collection_type(name: &str) -> bool {
    matches!(
        name,
        names::LIST
            | names::SET
            | names::SORTED_SET
            | names::ARRAY_LIST
            | names::LINKED_HASH_SET
            | names::TREE_SET
            | names::EMPTY_LIST
            | names::EMPTY_SET
            | names::EMPTY_SORTED_SET
            | names::SINGLETON_LIST
            | names::SINGLETON_SET
    )
}

/// True for any map shaped name, interface or concrete.
pub fn is_map_type(name: &str) -> bool {
    matches!(
        name,
        names::MAP
            | names::SORTED_MAP
            | names::LINKED_HASH_MAP
            | names::TREE_MAP
            | names::EMPTY_MAP
            | names::EMPTY_SORTED_MAP
            | names::SINGLETON_MAP
    )
}

/// Component type of an array type name, `"x[]"` -> `"x"`.
pub fn array_component(name: &str) -> Option<&str> {
    name.strip_suffix("[]")
}

/// Array type name for a component.
pub fn array_of(component: &str) -> String {
    format!("{}[]", component)
}

/// Inner type of `runtime-value<T>`, or `None` for anything else. The bare
/// `runtime-value` name yields `object`.
pub fn runtime_value_inner(name: &str) -> Option<&str> {
    if name == names::RUNTIME_VALUE {
        return Some(names::OBJECT);
    }
    name.strip_prefix("runtime-value<")
        .and_then(|rest| rest.strip_suffix('>'))
}

/// Structural assignability between type names. `object` accepts anything,
/// container interfaces accept their concrete family, everything else is
/// matched by name. User-class hierarchies are not modelled; a registry
/// entry is its own only supertype.
pub fn assignable(expected: &str, actual: &str) -> bool {
    if expected == actual || expected == names::OBJECT {
        return true;
    }
    match expected {
        names::LIST | names::SET | names::SORTED_SET => {
            is_collection_type(actual)
                && (expected != names::SORTED_SET
                    || matches!(actual, names::TREE_SET | names::EMPTY_SORTED_SET))
        }
        names::MAP | names::SORTED_MAP => {
            is_map_type(actual)
                && (expected != names::SORTED_MAP
                    || matches!(actual, names::TREE_MAP | names::EMPTY_SORTED_MAP))
        }
        _ => false,
    }
}

/// A reflective type value: what the framework records when a parameter is
/// itself a type description rather than an instance. Multi-bound wildcards
/// are not representable; the original system rejects them as unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtType {
    /// A raw class (or primitive) reference by name.
    Class(String),
    Parameterized {
        raw: Box<RtType>,
        args: Vec<RtType>,
        owner: Option<Box<RtType>>,
    },
    GenericArray(Box<RtType>),
    Wildcard(WildcardBound),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardBound {
    Unbounded,
    Upper(Box<RtType>),
    Lower(Box<RtType>),
}

impl fmt::Display for RtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtType::Class(name) => write!(f, "{}", name),
            RtType::Parameterized { raw, args, owner } => {
                if let Some(owner) = owner {
                    write!(f, "{}.", owner)?;
                }
                write!(f, "{}<", raw)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ">")
            }
            RtType::GenericArray(component) => write!(f, "{}[]", component),
            RtType::Wildcard(WildcardBound::Unbounded) => write!(f, "?"),
            RtType::Wildcard(WildcardBound::Upper(t)) => write!(f, "? extends {}", t),
            RtType::Wildcard(WildcardBound::Lower(t)) => write!(f, "? super {}", t),
        }
    }
}
