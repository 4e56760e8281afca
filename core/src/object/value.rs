//! file: core/src/object/value.rs
//! description: runtime value representation shared by recording and replay.
//!
//! `RtValue` is the uniform representation of every argument the engine can
//! record and every object the startup interpreter can rebuild. Scalars are
//! carried by value; everything with identity lives behind an `ObjRef`
//! (a shared, mutable heap cell) so that the identity map and the replayed
//! graph both observe reference sharing. JSON marshalling lives here as
//! well to centralize the conversion logic.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::Duration;

use url::Url;

use crate::object::ty::{self, names, RtType};
use crate::vm::StartupRecorder;

/// Opaque stand-in for a value produced by a recorded call, identified by a
/// string key into the startup context.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    key: String,
    static_init: bool,
    class: String,
}

impl ProxyHandle {
    pub(crate) fn new(key: String, static_init: bool, class: String) -> Self {
        ProxyHandle { key, static_init, class }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_static_init(&self) -> bool {
        self.static_init
    }

    pub fn proxied_class(&self) -> &str {
        &self.class
    }

    /// The only dispatches a returned proxy answers: the two tagging
    /// methods, `to_string`, `hash_code` and identity `equals`. Everything
    /// else is a build error directing the caller to pass the proxy back
    /// into a recorder instead.
    pub fn dispatch(&self, method: &str, args: &[RtValue]) -> Result<RtValue, crate::error::RecordError> {
        match method {
            "key" => Ok(RtValue::Str(self.key.clone())),
            "is_static_init" => Ok(RtValue::Bool(self.static_init)),
            "to_string" => Ok(RtValue::Str(self.to_string())),
            "hash_code" => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                self.key.hash(&mut hasher);
                Ok(RtValue::Int(hasher.finish() as i64))
            }
            "equals" => {
                let same = matches!(args.first(), Some(RtValue::Proxy(p)) if p.key == self.key);
                Ok(RtValue::Bool(same))
            }
            other => Err(crate::error::RecordError::DirectProxyCall {
                method: other.to_string(),
                key: self.key.clone(),
            }),
        }
    }
}

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime proxy of {} with id {}", self.class, self.key)
    }
}

/// Shared handle to a heap object. Cloning shares the cell; identity is the
/// cell address.
#[derive(Clone)]
pub struct ObjRef(Rc<RefCell<HeapObj>>);

impl ObjRef {
    pub fn new(obj: HeapObj) -> Self {
        ObjRef(Rc::new(RefCell::new(obj)))
    }

    /// Stable identity of the underlying cell, used by the identity map.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }

    pub fn same(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self) -> Ref<'_, HeapObj> {
        self.0.borrow()
    }

    pub fn get_mut(&self) -> RefMut<'_, HeapObj> {
        self.0.borrow_mut()
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef@{:x}", self.identity())
    }
}

/// A heap object: anything with identity and mutable contents. Containers
/// carry the concrete class name they were created as (`array-list`,
/// `tree-map`, the `empty-*`/`singleton-*` factory family, ...), which is
/// what the serialization dispatch keys on.
pub enum HeapObj {
    /// A scalar deliberately shared by reference.
    Boxed(RtValue),
    List {
        class: String,
        items: Vec<RtValue>,
    },
    Set {
        class: String,
        items: Vec<RtValue>,
    },
    Map {
        class: String,
        entries: Vec<(RtValue, RtValue)>,
        /// Set when a sorted map is backed by a comparator the engine
        /// cannot record.
        custom_comparator: bool,
    },
    Array {
        component: String,
        items: Vec<RtValue>,
    },
    Struct {
        class: String,
        values: BTreeMap<String, RtValue>,
    },
    Annotation {
        class: String,
        values: BTreeMap<String, RtValue>,
    },
    RuntimeValue(RtValue),
    /// A live recorder instance; only ever created by the interpreter.
    Recorder {
        class: String,
        instance: Box<dyn StartupRecorder>,
    },
}

impl fmt::Debug for HeapObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapObj::Boxed(v) => write!(f, "Boxed({:?})", v),
            HeapObj::List { class, items } => write!(f, "List[{}]{:?}", class, items),
            HeapObj::Set { class, items } => write!(f, "Set[{}]{:?}", class, items),
            HeapObj::Map { class, entries, .. } => write!(f, "Map[{}]{:?}", class, entries),
            HeapObj::Array { component, items } => write!(f, "Array[{}]{:?}", component, items),
            HeapObj::Struct { class, values } => write!(f, "Struct[{}]{:?}", class, values),
            HeapObj::Annotation { class, values } => {
                write!(f, "Annotation[{}]{:?}", class, values)
            }
            HeapObj::RuntimeValue(v) => write!(f, "RuntimeValue({:?})", v),
            HeapObj::Recorder { class, .. } => write!(f, "Recorder[{}]", class),
        }
    }
}

impl HeapObj {
    /// Concrete class name of the object, as the dispatch sees it.
    pub fn class_name(&self) -> String {
        match self {
            HeapObj::Boxed(v) => v.runtime_class(),
            HeapObj::List { class, .. }
            | HeapObj::Set { class, .. }
            | HeapObj::Map { class, .. }
            | HeapObj::Struct { class, .. }
            | HeapObj::Annotation { class, .. } => class.clone(),
            HeapObj::Array { component, .. } => ty::array_of(component),
            HeapObj::RuntimeValue(_) => names::RUNTIME_VALUE.to_string(),
            HeapObj::Recorder { class, .. } => class.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RtValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Duration(Duration),
    Url(Url),
    Enum { class: String, variant: String },
    /// A class reference by name; may be a class-proxy stand-in during
    /// recording.
    Class(String),
    Type(RtType),
    Optional(Option<Box<RtValue>>),
    Proxy(ProxyHandle),
    Ref(ObjRef),
}

impl RtValue {
    pub fn str(s: impl Into<String>) -> RtValue {
        RtValue::Str(s.into())
    }

    pub fn int(i: i64) -> RtValue {
        RtValue::Int(i)
    }

    /// A mutable `array-list` heap object.
    pub fn list(items: Vec<RtValue>) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::List { class: names::ARRAY_LIST.to_string(), items }))
    }

    /// A mutable `linked-hash-set` heap object.
    pub fn set(items: Vec<RtValue>) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Set {
            class: names::LINKED_HASH_SET.to_string(),
            items,
        }))
    }

    /// A mutable `linked-hash-map` heap object.
    pub fn map(entries: Vec<(RtValue, RtValue)>) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: names::LINKED_HASH_MAP.to_string(),
            entries,
            custom_comparator: false,
        }))
    }

    /// A naturally ordered `tree-map` heap object.
    pub fn sorted_map(entries: Vec<(RtValue, RtValue)>) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: names::TREE_MAP.to_string(),
            entries,
            custom_comparator: false,
        }))
    }

    /// The immutable empty list, as produced by the factory family.
    pub fn empty_list() -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::List { class: names::EMPTY_LIST.to_string(), items: vec![] }))
    }

    pub fn empty_set() -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Set { class: names::EMPTY_SET.to_string(), items: vec![] }))
    }

    pub fn empty_sorted_set() -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Set {
            class: names::EMPTY_SORTED_SET.to_string(),
            items: vec![],
        }))
    }

    pub fn empty_map() -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: names::EMPTY_MAP.to_string(),
            entries: vec![],
            custom_comparator: false,
        }))
    }

    pub fn empty_sorted_map() -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: names::EMPTY_SORTED_MAP.to_string(),
            entries: vec![],
            custom_comparator: false,
        }))
    }

    pub fn singleton_list(item: RtValue) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::List {
            class: names::SINGLETON_LIST.to_string(),
            items: vec![item],
        }))
    }

    pub fn singleton_set(item: RtValue) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Set {
            class: names::SINGLETON_SET.to_string(),
            items: vec![item],
        }))
    }

    pub fn singleton_map(key: RtValue, value: RtValue) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: names::SINGLETON_MAP.to_string(),
            entries: vec![(key, value)],
            custom_comparator: false,
        }))
    }

    pub fn array(component: impl Into<String>, items: Vec<RtValue>) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Array { component: component.into(), items }))
    }

    pub fn struct_obj(
        class: impl Into<String>,
        values: impl IntoIterator<Item = (&'static str, RtValue)>,
    ) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Struct {
            class: class.into(),
            values: values.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }))
    }

    /// A scalar shared by reference, so that identity dedup applies to it.
    pub fn boxed(value: RtValue) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::Boxed(value)))
    }

    pub fn runtime_value(value: RtValue) -> RtValue {
        RtValue::Ref(ObjRef::new(HeapObj::RuntimeValue(value)))
    }

    pub fn as_ref(&self) -> Option<&ObjRef> {
        match self {
            RtValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RtValue::Null)
    }

    /// The concrete class name the serialization dispatch keys on.
    pub fn runtime_class(&self) -> String {
        match self {
            RtValue::Null => names::OBJECT.to_string(),
            RtValue::Bool(_) => names::BOOL.to_string(),
            RtValue::Int(_) => names::INT.to_string(),
            RtValue::Float(_) => names::FLOAT.to_string(),
            RtValue::Char(_) => names::CHAR.to_string(),
            RtValue::Str(_) => names::STRING.to_string(),
            RtValue::Duration(_) => names::DURATION.to_string(),
            RtValue::Url(_) => names::URL.to_string(),
            RtValue::Enum { class, .. } => class.clone(),
            RtValue::Class(_) => names::CLASS.to_string(),
            RtValue::Type(_) => names::TYPE.to_string(),
            RtValue::Optional(_) => names::OPTION.to_string(),
            RtValue::Proxy(p) => p.proxied_class().to_string(),
            RtValue::Ref(r) => r.get().class_name(),
        }
    }
}

/// Structural equality. Two `Ref`s are equal when they are the same cell or
/// when their contents are equal; comparing distinct cells of a cyclic
/// graph does not terminate, so cycle assertions should use
/// [`ObjRef::same`] instead.
impl PartialEq for RtValue {
    fn eq(&self, other: &RtValue) -> bool {
        match (self, other) {
            (RtValue::Null, RtValue::Null) => true,
            (RtValue::Bool(a), RtValue::Bool(b)) => a == b,
            (RtValue::Int(a), RtValue::Int(b)) => a == b,
            (RtValue::Float(a), RtValue::Float(b)) => a == b,
            (RtValue::Char(a), RtValue::Char(b)) => a == b,
            (RtValue::Str(a), RtValue::Str(b)) => a == b,
            (RtValue::Duration(a), RtValue::Duration(b)) => a == b,
            (RtValue::Url(a), RtValue::Url(b)) => a == b,
            (
                RtValue::Enum { class: ca, variant: va },
                RtValue::Enum { class: cb, variant: vb },
            ) => ca == cb && va == vb,
            (RtValue::Class(a), RtValue::Class(b)) => a == b,
            (RtValue::Type(a), RtValue::Type(b)) => a == b,
            (RtValue::Optional(a), RtValue::Optional(b)) => a == b,
            (RtValue::Proxy(a), RtValue::Proxy(b)) => a.key() == b.key(),
            (RtValue::Ref(a), RtValue::Ref(b)) => {
                if a.same(b) {
                    return true;
                }
                heap_eq(&a.get(), &b.get())
            }
            _ => false,
        }
    }
}

fn heap_eq(a: &HeapObj, b: &HeapObj) -> bool {
    match (a, b) {
        (HeapObj::Boxed(x), HeapObj::Boxed(y)) => x == y,
        (HeapObj::List { items: x, .. }, HeapObj::List { items: y, .. }) => x == y,
        (HeapObj::Set { items: x, .. }, HeapObj::Set { items: y, .. }) => x == y,
        (HeapObj::Map { entries: x, .. }, HeapObj::Map { entries: y, .. }) => x == y,
        (
            HeapObj::Array { component: ca, items: x },
            HeapObj::Array { component: cb, items: y },
        ) => ca == cb && x == y,
        (
            HeapObj::Struct { class: ca, values: x },
            HeapObj::Struct { class: cb, values: y },
        ) => ca == cb && x == y,
        (
            HeapObj::Annotation { class: ca, values: x },
            HeapObj::Annotation { class: cb, values: y },
        ) => ca == cb && x == y,
        (HeapObj::RuntimeValue(x), HeapObj::RuntimeValue(y)) => x == y,
        _ => false,
    }
}

/// Deduplication key for the value-equality comparison mode. Floats are
/// compared and hashed by bit pattern so the key is total.
#[derive(Clone, Debug)]
pub(crate) struct ValueKey(pub RtValue);

impl PartialEq for ValueKey {
    fn eq(&self, other: &ValueKey) -> bool {
        match (&self.0, &other.0) {
            (RtValue::Float(a), RtValue::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(v: &RtValue, state: &mut H) {
    std::mem::discriminant(v).hash(state);
    match v {
        RtValue::Null => {}
        RtValue::Bool(b) => b.hash(state),
        RtValue::Int(i) => i.hash(state),
        RtValue::Float(f) => f.to_bits().hash(state),
        RtValue::Char(c) => c.hash(state),
        RtValue::Str(s) => s.hash(state),
        RtValue::Duration(d) => d.hash(state),
        RtValue::Url(u) => u.as_str().hash(state),
        RtValue::Enum { class, variant } => {
            class.hash(state);
            variant.hash(state);
        }
        RtValue::Class(c) => c.hash(state),
        RtValue::Type(t) => t.to_string().hash(state),
        RtValue::Optional(opt) => {
            if let Some(inner) = opt {
                hash_value(inner, state);
            }
        }
        RtValue::Proxy(p) => p.key().hash(state),
        RtValue::Ref(r) => match &*r.get() {
            HeapObj::Boxed(inner) => hash_value(inner, state),
            HeapObj::List { items, .. } | HeapObj::Set { items, .. } => {
                for i in items {
                    hash_value(i, state);
                }
            }
            HeapObj::Map { entries, .. } => {
                for (k, val) in entries {
                    hash_value(k, state);
                    hash_value(val, state);
                }
            }
            HeapObj::Array { component, items } => {
                component.hash(state);
                for i in items {
                    hash_value(i, state);
                }
            }
            HeapObj::Struct { class, values } | HeapObj::Annotation { class, values } => {
                class.hash(state);
                for (k, val) in values {
                    k.hash(state);
                    hash_value(val, state);
                }
            }
            HeapObj::RuntimeValue(inner) => hash_value(inner, state),
            HeapObj::Recorder { .. } => r.identity().hash(state),
        },
    }
}

/// Canonical duration text, `"<secs>.<nanos>s"` with the fraction omitted
/// for whole seconds. This is what gets recorded and what the interpreter
/// parses back.
pub fn format_duration(d: &Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}.{:09}s", d.as_secs(), d.subsec_nanos())
    }
}

/// Parse the canonical duration text produced by [`format_duration`].
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let body = text
        .strip_suffix('s')
        .ok_or_else(|| format!("malformed duration '{}'", text))?;
    let (secs, nanos) = match body.split_once('.') {
        Some((s, n)) => {
            if n.len() != 9 {
                return Err(format!("malformed duration '{}'", text));
            }
            (s, n)
        }
        None => (body, "0"),
    };
    let secs: u64 = secs.parse().map_err(|_| format!("malformed duration '{}'", text))?;
    let nanos: u32 = nanos.parse().map_err(|_| format!("malformed duration '{}'", text))?;
    Ok(Duration::new(secs, nanos))
}

// JSON marshalling helpers, used by object-loader implementations and for
// debug output. The mapping is intentionally lossy in the same places the
// reference framework's is: enums, classes and proxies flatten to strings.
impl RtValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RtValue::Null => serde_json::Value::Null,
            RtValue::Bool(b) => serde_json::Value::Bool(*b),
            RtValue::Int(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            RtValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            RtValue::Char(c) => serde_json::Value::String(c.to_string()),
            RtValue::Str(s) => serde_json::Value::String(s.clone()),
            RtValue::Duration(d) => serde_json::Value::String(format_duration(d)),
            RtValue::Url(u) => serde_json::Value::String(u.as_str().to_string()),
            RtValue::Enum { class, variant } => {
                serde_json::Value::String(format!("{}::{}", class, variant))
            }
            RtValue::Class(name) => serde_json::Value::String(name.clone()),
            RtValue::Type(t) => serde_json::Value::String(t.to_string()),
            RtValue::Optional(opt) => match opt {
                Some(inner) => inner.to_json(),
                None => serde_json::Value::Null,
            },
            RtValue::Proxy(p) => serde_json::Value::String(p.key().to_string()),
            RtValue::Ref(r) => match &*r.get() {
                HeapObj::Boxed(inner) | HeapObj::RuntimeValue(inner) => inner.to_json(),
                HeapObj::List { items, .. }
                | HeapObj::Set { items, .. }
                | HeapObj::Array { items, .. } => {
                    serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
                }
                HeapObj::Map { entries, .. } => {
                    let mut out = serde_json::Map::new();
                    for (k, v) in entries {
                        let key = match k {
                            RtValue::Str(s) => s.clone(),
                            other => other.to_json().to_string(),
                        };
                        out.insert(key, v.to_json());
                    }
                    serde_json::Value::Object(out)
                }
                HeapObj::Struct { values, .. } | HeapObj::Annotation { values, .. } => {
                    let mut out = serde_json::Map::new();
                    for (k, v) in values {
                        out.insert(k.clone(), v.to_json());
                    }
                    serde_json::Value::Object(out)
                }
                HeapObj::Recorder { .. } => serde_json::Value::String("<recorder>".to_string()),
            },
        }
    }

    /// Build a value from JSON: objects become `linked-hash-map` heap
    /// objects with string keys, arrays become `array-list`s.
    pub fn from_json(v: &serde_json::Value) -> RtValue {
        match v {
            serde_json::Value::Null => RtValue::Null,
            serde_json::Value::Bool(b) => RtValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RtValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    RtValue::Int(u as i64)
                } else {
                    RtValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => RtValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                RtValue::list(items.iter().map(RtValue::from_json).collect())
            }
            serde_json::Value::Object(map) => RtValue::map(
                map.iter()
                    .map(|(k, v)| (RtValue::Str(k.clone()), RtValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}
