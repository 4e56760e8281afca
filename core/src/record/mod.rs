//! file: core/src/record/mod.rs
//! description: the bytecode recorder and its recording proxies.
//!
//! A `BytecodeRecorder` observes invocations made against recording proxies
//! during one build step, then emits a startup program that replays those
//! invocations against freshly constructed recorder instances. The heavy
//! lifting lives in the submodules: `serialize` lowers argument values into
//! deferred nodes, `deferred` knows how each node emits itself, `split`
//! partitions the emitted groups into bounded procedures, and `hooks`
//! carries the registered extension points.

pub mod hooks;
mod deferred;
mod proxy;
mod serialize;
mod split;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RecordError;
use crate::ir::op::{Op, NO_ARG_CTOR};
use crate::ir::{emit_bytecode, Program, ProgramBuilder};
use crate::object::class::ClassSpec;
use crate::object::ty::{self, names};
use crate::object::value::ProxyHandle;
use crate::object::{MethodSpec, RtValue, TypeRegistry};
use crate::record::deferred::{stored, Creation, Deferred};
use crate::record::hooks::{Hooks, NonDefaultCtor, SubstitutionHolder};
use crate::record::serialize::Serializer;
use crate::record::split::SplitContext;
use crate::vm::ObjectSubstitution;

pub use hooks::ObjectLoader;

/// Package prefix of every generated program name.
pub const BASE_PACKAGE: &str = "encore.recorded.";

/// Name of the dedicated array-factory procedure.
pub const CREATE_ARRAY: &str = "$encore$createArray";

/// Sink for the generated program. Build steps hand one to
/// [`BytecodeRecorder::write_bytecode`].
pub trait ClassOutput {
    fn write(&mut self, name: &str, bytes: &[u8]);
}

/// A `ClassOutput` collecting generated programs in memory.
#[derive(Debug, Default)]
pub struct InMemoryClassOutput {
    pub classes: Vec<(String, Vec<u8>)>,
}

impl InMemoryClassOutput {
    pub fn new() -> Self {
        InMemoryClassOutput::default()
    }
}

impl ClassOutput for InMemoryClassOutput {
    fn write(&mut self, name: &str, bytes: &[u8]) {
        self.classes.push((name.to_string(), bytes.to_vec()));
    }
}

#[derive(Clone)]
enum Instruction {
    StoredCall {
        class: String,
        method: MethodSpec,
        args: Vec<RtValue>,
        proxy_key: Option<String>,
    },
    NewInstance {
        class: String,
        key: String,
    },
}

struct RecordState {
    calls: Vec<Instruction>,
    proxies: HashMap<String, RecordingProxy>,
    hooks: Hooks,
    next_key: usize,
    load_complete: bool,
}

impl RecordState {
    fn new() -> Self {
        RecordState {
            calls: Vec::new(),
            proxies: HashMap::new(),
            hooks: Hooks::default(),
            next_key: 0,
            load_complete: false,
        }
    }
}

type ConfigCreator = dyn Fn(&str) -> Option<RtValue>;

/// Records invocations against recorder classes and writes out the startup
/// program that replays them. One instance corresponds to one generated
/// program; emission is single-threaded.
pub struct BytecodeRecorder {
    static_init: bool,
    class_name: String,
    build_step_name: Option<String>,
    method_name: Option<String>,
    registry: Rc<TypeRegistry>,
    use_identity: bool,
    config_creator: Option<Box<ConfigCreator>>,
    state: Rc<RefCell<RecordState>>,
}

impl BytecodeRecorder {
    pub fn new(
        static_init: bool,
        build_step_name: &str,
        method_name: &str,
        unique_hash: &str,
        registry: Rc<TypeRegistry>,
    ) -> Self {
        let class_name = format!("{}{}${}{}", BASE_PACKAGE, build_step_name, method_name, unique_hash);
        BytecodeRecorder {
            static_init,
            class_name,
            build_step_name: Some(build_step_name.to_string()),
            method_name: Some(method_name.to_string()),
            registry,
            use_identity: true,
            config_creator: None,
            state: Rc::new(RefCell::new(RecordState::new())),
        }
    }

    /// Construct with an explicit program name and no build-step marker;
    /// mainly useful in tests.
    pub fn for_class_name(static_init: bool, class_name: &str, registry: Rc<TypeRegistry>) -> Self {
        BytecodeRecorder {
            static_init,
            class_name: class_name.to_string(),
            build_step_name: None,
            method_name: None,
            registry,
            use_identity: true,
            config_creator: None,
            state: Rc::new(RefCell::new(RecordState::new())),
        }
    }

    /// Switch the deduplication map from identity to structural equality.
    pub fn set_use_identity_comparison(&mut self, use_identity: bool) {
        self.use_identity = use_identity;
    }

    /// Install the fallback producer for injected recorder-constructor
    /// parameters that match no registered constant.
    pub fn set_config_creator<F>(&mut self, f: F)
    where
        F: Fn(&str) -> Option<RtValue> + 'static,
    {
        self.config_creator = Some(Box::new(f));
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().calls.is_empty()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_static_init(&self) -> bool {
        self.static_init
    }

    /// Obtain the recording proxy for a recorder class; repeated calls
    /// return the same proxy.
    pub fn get_recording_proxy(&self, class: &str) -> Result<RecordingProxy, RecordError> {
        let spec = self
            .registry
            .get(class)
            .ok_or_else(|| RecordError::UnknownClass { name: class.to_string() })?;
        // fail fast on an unusable recorder constructor
        select_recorder_ctor(spec)?;
        let mut st = self.state.borrow_mut();
        if let Some(existing) = st.proxies.get(class) {
            return Ok(existing.clone());
        }
        let proxy = RecordingProxy {
            class: class.to_string(),
            proxy_class: proxy::recording_proxy_class(class),
            static_init: self.static_init,
            registry: self.registry.clone(),
            key_prefix: Rc::new(self.class_name.clone()),
            state: self.state.clone(),
        };
        st.proxies.insert(class.to_string(), proxy.clone());
        Ok(proxy)
    }

    /// Enqueue construction of `class` by no-arg constructor at startup,
    /// published as a runtime-value under a fresh key. Returns the proxy
    /// standing in for that value.
    pub fn new_instance(&self, class: &str) -> RtValue {
        let mut st = self.state.borrow_mut();
        let n = st.next_key;
        st.next_key += 1;
        let key = format!("{}$proxykey{}", self.class_name, n);
        st.calls.push(Instruction::NewInstance { class: class.to_string(), key: key.clone() });
        RtValue::Proxy(ProxyHandle::new(key, self.static_init, names::RUNTIME_VALUE.to_string()))
    }

    /// A stand-in class reference for a class that cannot be resolved at
    /// build time; the original name is restored during emission.
    /// Primitive names need no stand-in and are returned as-is.
    pub fn class_proxy(&self, name: &str) -> RtValue {
        if ty::is_primitive(name) || name == names::VOID {
            return RtValue::Class(name.to_string());
        }
        let mut st = self.state.borrow_mut();
        if let Some(existing) = st.hooks.original_to_class_proxy.get(name) {
            return RtValue::Class(existing.clone());
        }
        let proxy_name = format!("encore.generated.ClassProxy{}", proxy::next_count());
        st.hooks.class_proxy_to_original.insert(proxy_name.clone(), name.to_string());
        st.hooks.original_to_class_proxy.insert(name.to_string(), proxy_name.clone());
        RtValue::Class(proxy_name)
    }

    /// Register a two-way conversion for an otherwise-unrecordable class.
    pub fn register_substitution(
        &self,
        from: &str,
        to: &str,
        provider: &str,
        instance: Box<dyn ObjectSubstitution>,
    ) {
        self.state.borrow_mut().hooks.substitutions.insert(
            from.to_string(),
            SubstitutionHolder { to: to.to_string(), provider: provider.to_string(), instance },
        );
    }

    /// Register a specific constructor plus the extractor producing its
    /// ordered argument values from a live object.
    pub fn register_non_default_constructor<F>(&self, class: &str, ctor_index: usize, extractor: F)
    where
        F: Fn(&RtValue) -> Vec<RtValue> + 'static,
    {
        self.state.borrow_mut().hooks.non_default_ctors.insert(
            class.to_string(),
            NonDefaultCtor { ctor_index, extractor: Box::new(extractor) },
        );
    }

    pub fn register_object_loader(&self, loader: Rc<dyn ObjectLoader>) {
        self.state.borrow_mut().hooks.loaders.push(loader);
    }

    pub fn register_constant(&self, ty: &str, value: RtValue) {
        self.state.borrow_mut().hooks.constants.insert(ty.to_string(), value);
    }

    pub fn mark_class_as_constructor_recordable(&self, class: &str) {
        self.state.borrow_mut().hooks.ctor_recordable.insert(class.to_string());
    }

    /// Emit the program and hand its binary form to the output.
    pub fn write_bytecode(&self, output: &mut dyn ClassOutput) -> Result<(), RecordError> {
        let program = self.finish()?;
        output.write(&program.class_name, &emit_bytecode(&program));
        Ok(())
    }

    /// Lower every recorded call into the deferred graph and emit the
    /// startup program. Consuming in spirit: once emission has run, no new
    /// deferred value may be created and a second emission is an error.
    pub fn finish(&self) -> Result<Program, RecordError> {
        let registry = &*self.registry;
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        if st.load_complete {
            return Err(RecordError::LateAllocation);
        }
        let calls = st.calls.clone();
        let mut ser = Serializer::new(registry, &st.hooks, self.static_init, self.use_identity);

        // one deferred recorder instance per recorder class, in first-use
        // order, plus the deferred nodes of every argument
        let mut recorder_order: Vec<String> = Vec::new();
        let mut recorder_nodes: HashMap<String, Deferred> = HashMap::new();
        let mut call_params: Vec<Vec<Deferred>> = Vec::with_capacity(calls.len());
        for call in &calls {
            match call {
                Instruction::StoredCall { class, method, args, .. } => {
                    if !recorder_nodes.contains_key(class) {
                        let spec = registry
                            .get(class)
                            .ok_or_else(|| RecordError::UnknownClass { name: class.clone() })?;
                        let ctor = select_recorder_ctor(spec)?;
                        let node = stored(
                            Some(class.clone()),
                            Creation::Recorder {
                                class: class.clone(),
                                ctor: ctor.unwrap_or(NO_ARG_CTOR),
                                args: Vec::new(),
                            },
                        );
                        recorder_order.push(class.clone());
                        recorder_nodes.insert(class.clone(), node);
                    }
                    let mut params = Vec::with_capacity(args.len());
                    for (i, arg) in args.iter().enumerate() {
                        let pspec = &method.params[i];
                        let node =
                            ser.load(arg, &pspec.ty, pspec.relaxed).map_err(|e| {
                                RecordError::RecordCall {
                                    class: class.clone(),
                                    method: method.name.clone(),
                                    source: Box::new(e),
                                }
                            })?;
                        params.push(node);
                    }
                    call_params.push(params);
                }
                Instruction::NewInstance { .. } => call_params.push(Vec::new()),
            }
        }

        // resolve injected constructor parameters of every recorder
        for class in &recorder_order {
            let spec = registry
                .get(class)
                .ok_or_else(|| RecordError::UnknownClass { name: class.clone() })?;
            if let Some(index) = select_recorder_ctor(spec)? {
                let ctor_spec = &spec.ctors[index];
                if !ctor_spec.params.is_empty() {
                    let mut args = Vec::with_capacity(ctor_spec.params.len());
                    for param in &ctor_spec.params {
                        args.push(ser.injected_param(
                            class,
                            &param.ty,
                            self.config_creator.as_deref(),
                        )?);
                    }
                    if let Some(node) = recorder_nodes.get(class) {
                        node.set_creation(Creation::Recorder {
                            class: class.clone(),
                            ctor: index,
                            args,
                        });
                    }
                }
            }
        }

        // from here on the graph is frozen
        st.load_complete = true;

        let mut pb = ProgramBuilder::new(self.class_name.clone());
        let entry = pb.add_proc("deploy");
        if let (Some(step), Some(method)) = (&self.build_step_name, &self.method_name) {
            pb.proc_mut(entry).emit(Op::SetStepName { name: format!("{}.{}", step, method) });
        }
        let create_array = pb.add_proc(CREATE_ARRAY);
        pb.proc_mut(create_array).emit(Op::MakeSharedArray { len: 0 });
        pb.proc_mut(entry).emit(Op::CallProc { index: create_array });

        let array_count;
        {
            let mut ctx = SplitContext::new(&mut pb, entry);
            for class in &recorder_order {
                if let Some(node) = recorder_nodes.get(class) {
                    node.prepare(&mut ctx)?;
                }
            }
            for (call, params) in calls.iter().zip(&call_params) {
                match call {
                    Instruction::StoredCall { class, method, proxy_key, .. } => {
                        // creation fragments land ahead of the invocation,
                        // possibly in earlier procedures
                        for param in params {
                            param.prepare(&mut ctx)?;
                        }
                        let recorder = recorder_nodes
                            .get(class)
                            .cloned()
                            .ok_or_else(|| RecordError::UnknownClass { name: class.clone() })?;
                        recorder.prepare(&mut ctx)?;
                        ctx.write_group(|ctx| {
                            let mut arg_locals = Vec::with_capacity(params.len());
                            for param in params {
                                arg_locals.push(param.load(ctx)?);
                            }
                            let target = recorder.load(ctx)?;
                            let proc = ctx.proc_mut_current();
                            if method.ret != names::VOID {
                                let dest = proc.alloc_local();
                                proc.emit(Op::Invoke {
                                    dest: Some(dest),
                                    recorder: target,
                                    class: class.clone(),
                                    method: method.name.clone(),
                                    args: arg_locals,
                                });
                                if let Some(key) = proxy_key {
                                    proc.emit(Op::CtxPut { key: key.clone(), src: dest });
                                }
                            } else {
                                proc.emit(Op::Invoke {
                                    dest: None,
                                    recorder: target,
                                    class: class.clone(),
                                    method: method.name.clone(),
                                    args: arg_locals,
                                });
                            }
                            Ok(())
                        })?;
                    }
                    Instruction::NewInstance { class, key } => {
                        ctx.write_group(|ctx| {
                            let proc = ctx.proc_mut_current();
                            let instance = proc.alloc_local();
                            proc.emit(Op::New {
                                dest: instance,
                                class: class.clone(),
                                ctor: NO_ARG_CTOR,
                                args: vec![],
                            });
                            let wrapped = proc.alloc_local();
                            proc.emit(Op::WrapRuntimeValue { dest: wrapped, src: instance });
                            proc.emit(Op::CtxPut { key: key.clone(), src: wrapped });
                            Ok(())
                        })?;
                    }
                }
            }
            array_count = ctx.array_count();
        }
        pb.proc_mut(create_array).patch_op(0, Op::MakeSharedArray { len: array_count });

        let program = pb.finish();
        log::debug!(
            "emitted {}: {} procedures, {} shared slots, {} recorded instructions",
            program.class_name,
            program.procs.len(),
            array_count,
            calls.len()
        );
        Ok(program)
    }
}

/// The proxy handed to build-step code: every dispatched method is recorded
/// instead of executed, and non-void methods yield a return-value proxy.
#[derive(Clone)]
pub struct RecordingProxy {
    class: String,
    proxy_class: String,
    static_init: bool,
    registry: Rc<TypeRegistry>,
    key_prefix: Rc<String>,
    state: Rc<RefCell<RecordState>>,
}

impl RecordingProxy {
    pub fn recorder_class(&self) -> &str {
        &self.class
    }

    /// Dispatch a recorder method. `to_string` with no arguments is
    /// answered locally (with the proxy class name) so accidental logging
    /// never records anything.
    pub fn invoke(&self, method: &str, args: Vec<RtValue>) -> Result<RtValue, RecordError> {
        if method == "to_string" && args.is_empty() {
            return Ok(RtValue::Str(self.proxy_class.clone()));
        }
        let spec = self
            .registry
            .get(&self.class)
            .ok_or_else(|| RecordError::UnknownClass { name: self.class.clone() })?;
        let m = spec
            .find_method(method)
            .ok_or_else(|| RecordError::UnknownMethod {
                class: self.class.clone(),
                method: method.to_string(),
            })?
            .clone();
        if m.params.len() != args.len() {
            return Err(RecordError::UnsupportedValue {
                detail: format!(
                    "{}::{} takes {} arguments, got {}",
                    self.class,
                    method,
                    m.params.len(),
                    args.len()
                ),
            });
        }
        if self.static_init {
            for (i, arg) in args.iter().enumerate() {
                if let RtValue::Proxy(p) = arg {
                    if !p.is_static_init() {
                        return Err(RecordError::CrossPhaseProxy {
                            key: p.key().to_string(),
                            position: i,
                            method: format!("{}::{}", self.class, method),
                        });
                    }
                }
            }
        }
        let mut st = self.state.borrow_mut();
        if m.ret == names::VOID {
            st.calls.push(Instruction::StoredCall {
                class: self.class.clone(),
                method: m,
                args,
                proxy_key: None,
            });
            return Ok(RtValue::Null);
        }
        if !proxy::is_proxiable(&self.registry, &m.ret) {
            return Err(RecordError::UnrecordableReturn {
                class: self.class.clone(),
                method: method.to_string(),
                return_type: m.ret.clone(),
            });
        }
        let n = st.next_key;
        st.next_key += 1;
        let key = format!("{}$proxykey{}", self.key_prefix, n);
        // mint the proxy class for this return type so the cache is warm
        let _ = proxy::return_value_proxy_class(&m.ret);
        let handle = ProxyHandle::new(key.clone(), self.static_init, m.ret.clone());
        st.calls.push(Instruction::StoredCall {
            class: self.class.clone(),
            method: m,
            args,
            proxy_key: Some(key),
        });
        Ok(RtValue::Proxy(handle))
    }
}

/// Pick the recorder constructor: the only one, or the only one flagged
/// for injection. `None` means the implicit no-arg constructor.
fn select_recorder_ctor(spec: &ClassSpec) -> Result<Option<usize>, RecordError> {
    if spec.ctors.is_empty() {
        return Ok(None);
    }
    if spec.ctors.len() == 1 {
        return Ok(Some(0));
    }
    let mut inject: Option<usize> = None;
    for (i, c) in spec.ctors.iter().enumerate() {
        if c.inject {
            if inject.is_some() {
                return Err(RecordError::AmbiguousInjectConstructor { class: spec.name.clone() });
            }
            inject = Some(i);
        }
    }
    inject
        .map(Some)
        .ok_or_else(|| RecordError::NoRecorderConstructor { class: spec.name.clone() })
}
