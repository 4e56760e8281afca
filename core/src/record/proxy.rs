//! file: core/src/record/proxy.rs
//! description: proxy-class minting and proxiability rules.
//!
//! Two proxy families exist: recording proxies (one per recorder class) and
//! return-value proxies (one class per return type, one instance per
//! recorded call). Here live the process-wide caches for both families and
//! the rules deciding whether a return type can be proxied at all. The
//! caches may be populated from several build threads; insertion is
//! last-writer-wins with stable keys, so racing writers agree on the
//! observable mapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::object::ty::{self, names};
use crate::object::TypeRegistry;

/// Process-wide monotonic counter for generated proxy-class suffixes.
static COUNT: AtomicUsize = AtomicUsize::new(1);

static RECORDING_PROXIES: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
static RETURN_VALUE_PROXIES: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();

pub(crate) fn next_count() -> usize {
    COUNT.fetch_add(1, Ordering::Relaxed)
}

fn cached(cache: &OnceLock<Mutex<HashMap<String, String>>>, class: &str, suffix: &str) -> String {
    let mutex = cache.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(class) {
        return existing.clone();
    }
    let name = format!("{}$${}{}", class, suffix, next_count());
    map.insert(class.to_string(), name.clone());
    name
}

/// Name of the recording-proxy class for a recorder class.
pub(crate) fn recording_proxy_class(class: &str) -> String {
    cached(&RECORDING_PROXIES, class, "RecordingProxy")
}

/// Name of the return-value-proxy class for a return type.
pub(crate) fn return_value_proxy_class(class: &str) -> String {
    cached(&RETURN_VALUE_PROXIES, class, "ReturnValueProxy")
}

/// Whether a recorder-method return type can be fulfilled with a proxy.
/// The runtime-value wrapper always can; primitives and the final builtin
/// classes never can; interfaces can; a concrete registered class needs a
/// no-arg constructor and must not be final.
pub(crate) fn is_proxiable(registry: &TypeRegistry, ret: &str) -> bool {
    if ty::runtime_value_inner(ret).is_some() {
        return true;
    }
    if ty::is_primitive(ret) {
        return false;
    }
    match ret {
        names::STRING | names::URL | names::DURATION | names::CLASS | names::OPTION
        | names::TYPE => false,
        names::OBJECT
        | names::LIST
        | names::SET
        | names::SORTED_SET
        | names::MAP
        | names::SORTED_MAP => true,
        other => match registry.get(other) {
            Some(spec) => !spec.is_final && spec.has_default_ctor(),
            None => false,
        },
    }
}
