//! file: core/src/object/registry.rs
//! description: the class registry consulted during recording and replay.

use std::collections::HashMap;

use crate::object::class::ClassSpec;
use crate::object::ty::{self, names};

/// Registry of class descriptions. The recording side consults it for
/// method descriptors, constructors, properties and fields; the startup
/// interpreter consults it to construct objects and resolve class
/// references. Build and startup normally share one registry, but the
/// startup side may carry a superset (classes that were not loadable at
/// build time and were recorded through class proxies).
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    classes: HashMap<String, ClassSpec>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry { classes: HashMap::new() }
    }

    pub fn register(&mut self, spec: ClassSpec) {
        log::debug!("registering class '{}'", spec.name);
        self.classes.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ClassSpec> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// True when a class reference by this name can be resolved at startup:
    /// a registered class, a builtin, or an array of either.
    pub fn resolvable(&self, name: &str) -> bool {
        if let Some(component) = ty::array_component(name) {
            return self.resolvable(component);
        }
        self.contains(name)
            || ty::is_primitive(name)
            || ty::is_collection_type(name)
            || ty::is_map_type(name)
            || matches!(
                name,
                names::OBJECT
                    | names::VOID
                    | names::STRING
                    | names::DURATION
                    | names::URL
                    | names::CLASS
                    | names::TYPE
                    | names::OPTION
                    | names::RUNTIME_VALUE
            )
    }

    /// Assignability between type names; falls back to the structural rules
    /// for builtins.
    pub fn assignable(&self, expected: &str, actual: &str) -> bool {
        ty::assignable(expected, actual)
    }
}
