//! file: core/src/record/hooks.rs
//! description: extension hooks consulted by the serialization dispatch.
//!
//! Substitutions, non-default constructors, object loaders, constants and
//! class-name proxies are all registered against the recorder and looked up
//! here during serialization. Nothing in this module emits code on its own;
//! the dispatch decides when a hook applies.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::RecordError;
use crate::ir::builder::ProcBuilder;
use crate::ir::op::Local;
use crate::object::RtValue;
use crate::vm::ObjectSubstitution;

/// A pluggable creation-fragment emitter. When `can_handle` accepts a
/// value, the dispatch hands emission over to `load`, which writes the
/// fragment into the current procedure and returns the local holding the
/// created value.
pub trait ObjectLoader {
    fn can_handle(&self, value: &RtValue, static_init: bool) -> bool;
    fn load(
        &self,
        body: &mut ProcBuilder,
        value: &RtValue,
        static_init: bool,
    ) -> Result<Local, RecordError>;
}

pub(crate) struct SubstitutionHolder {
    pub to: String,
    pub provider: String,
    pub instance: Box<dyn ObjectSubstitution>,
}

pub(crate) struct NonDefaultCtor {
    pub ctor_index: usize,
    pub extractor: Box<dyn Fn(&RtValue) -> Vec<RtValue>>,
}

/// All registered hooks of one recorder.
#[derive(Default)]
pub(crate) struct Hooks {
    /// from-class -> substitution
    pub substitutions: HashMap<String, SubstitutionHolder>,
    pub non_default_ctors: HashMap<String, NonDefaultCtor>,
    pub loaders: Vec<Rc<dyn ObjectLoader>>,
    /// type name -> constant value
    pub constants: HashMap<String, RtValue>,
    pub ctor_recordable: HashSet<String>,
    pub class_proxy_to_original: HashMap<String, String>,
    pub original_to_class_proxy: HashMap<String, String>,
}

impl Hooks {
    pub fn substitution_for(&self, runtime_class: &str, expected: &str) -> Option<&SubstitutionHolder> {
        self.substitutions.get(runtime_class).or_else(|| self.substitutions.get(expected))
    }

    pub fn find_loader(&self, value: &RtValue, static_init: bool) -> Option<Rc<dyn ObjectLoader>> {
        self.loaders.iter().find(|l| l.can_handle(value, static_init)).cloned()
    }

    /// Map a class-proxy name back to the original class name recorded for
    /// it; unproxied names pass through.
    pub fn original_class_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.class_proxy_to_original.get(name).map(String::as_str).unwrap_or(name)
    }
}
