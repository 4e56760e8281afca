//! file: core/src/vm/context.rs
//! description: the startup context consumed by emitted programs.

use std::collections::HashMap;

use crate::object::RtValue;

/// A string-keyed registry of runtime values plus the current build-step
/// marker. Recorded return values are published here and looked up here;
/// this is the only channel between recorded invocations.
#[derive(Debug, Default)]
pub struct StartupContext {
    values: HashMap<String, RtValue>,
    current_step: Option<String>,
}

impl StartupContext {
    pub fn new() -> Self {
        StartupContext::default()
    }

    pub fn set_current_build_step_name(&mut self, name: impl Into<String>) {
        self.current_step = Some(name.into());
    }

    pub fn current_build_step_name(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn get_value(&self, key: &str) -> Option<RtValue> {
        self.values.get(key).cloned()
    }

    pub fn put_value(&mut self, key: impl Into<String>, value: RtValue) {
        self.values.insert(key.into(), value);
    }
}
