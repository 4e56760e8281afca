//! file: core/src/record/deferred.rs
//! description: the deferred-parameter graph.
//!
//! Every recorded argument is lowered into a node describing how to
//! recreate it at startup. Inline nodes re-emit their load at every use
//! site; array-stored nodes run a creation fragment once and are read back
//! through the shared object array when a use crosses a procedure
//! boundary. The graph is a DAG through the identity map, except that
//! population steps may legally point back at their own object: a node
//! exists (and can be loaded) as soon as its construction group has run,
//! before its population steps have.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RecordError;
use crate::ir::op::{ConstVal, FactoryKind, Local, Op, NO_ARG_CTOR};
use crate::object::RtValue;
use crate::record::hooks::ObjectLoader;
use crate::record::split::SplitContext;

pub(crate) type Deferred = Rc<DeferredParam>;

pub(crate) enum DeferredParam {
    Inline(InlineLoad),
    Stored(StoredParam),
}

/// Loads that are cheap enough to re-emit at every use site.
pub(crate) enum InlineLoad {
    Const(ConstVal),
    Enum { class: String, variant: String },
    Url(String),
    Duration(String),
    ClassRef(String),
    /// Lookup of an earlier return value in the startup context.
    CtxValue(String),
    Factory { kind: FactoryKind, args: Vec<Deferred> },
    Parameterized { raw: Deferred, args: Vec<Deferred>, owner: Option<Deferred> },
    GenericArray(Deferred),
    Wildcard { upper: bool, bound: Deferred },
}

pub(crate) struct StoredParam {
    /// Declared type used for the read-back cast, when one is known.
    pub decl_class: Option<String>,
    pub creation: RefCell<Creation>,
    state: RefCell<StoredState>,
}

#[derive(Default)]
struct StoredState {
    prepared: bool,
    array_index: Option<usize>,
    /// (procedure, local) of the creation result.
    origin: Option<(usize, Local)>,
}

/// How an array-stored value is created.
pub(crate) enum Creation {
    /// Placeholder while the graph for a complex object is still being
    /// built; replaced before preparation starts.
    Pending,
    /// A scalar deliberately shared by identity.
    Scalar(ConstVal),
    Loader { loader: Rc<dyn ObjectLoader>, value: RtValue, static_init: bool },
    Substituted { provider: String, serialized: Deferred },
    OptionalOf(Deferred),
    OptionalEmpty,
    RuntimeValueWrap(Deferred),
    RuntimeValueEmpty,
    Array { component: String, items: Vec<Deferred> },
    Annotation { class: String, args: Vec<Deferred> },
    Recorder { class: String, ctor: usize, args: Vec<Deferred> },
    Object { construct: Construct, ctor_args: Vec<Deferred>, steps: Vec<Step> },
}

/// Construction strategy of a complex object.
pub(crate) enum Construct {
    /// A selected constructor (registry index) of the class.
    Ctor { class: String, ctor: usize },
    /// The no-arg constructor of the concrete class.
    Default { class: String },
    /// A container class, optionally sized from the source.
    Container { class: String, capacity: Option<usize> },
}

/// A population step run after construction, in its own instruction group.
pub(crate) enum Step {
    Add(Deferred),
    Put(Deferred, Deferred),
    SetProperty { name: String, value: Deferred },
    SetField { name: String, value: Deferred },
    /// Append into the container returned by a read-only property.
    AddToProperty { name: String, items: Vec<Deferred> },
    PutToProperty { name: String, entries: Vec<(Deferred, Deferred)> },
}

pub(crate) fn inline(load: InlineLoad) -> Deferred {
    Rc::new(DeferredParam::Inline(load))
}

pub(crate) fn stored(decl_class: Option<String>, creation: Creation) -> Deferred {
    Rc::new(DeferredParam::Stored(StoredParam {
        decl_class,
        creation: RefCell::new(creation),
        state: RefCell::new(StoredState::default()),
    }))
}

impl StoredParam {
    fn set_origin(&self, proc: usize, local: Local) {
        self.state.borrow_mut().origin = Some((proc, local));
    }
}

impl DeferredParam {
    /// Resolve a pending creation strategy; only ever called on stored
    /// nodes while the graph is being built.
    pub(crate) fn set_creation(&self, creation: Creation) {
        match self {
            DeferredParam::Stored(node) => *node.creation.borrow_mut() = creation,
            DeferredParam::Inline(_) => unreachable!("inline nodes have no creation"),
        }
    }
}

impl DeferredParam {
    /// Idempotent: wires the subgraph and emits the creation fragment into
    /// whichever procedure is current when first called.
    pub fn prepare(&self, ctx: &mut SplitContext) -> Result<(), RecordError> {
        match self {
            DeferredParam::Inline(load) => load.prepare_children(ctx),
            DeferredParam::Stored(node) => {
                if node.state.borrow().prepared {
                    return Ok(());
                }
                node.state.borrow_mut().prepared = true;
                self.prepare_stored(node, ctx)
            }
        }
    }

    fn prepare_stored(&self, node: &StoredParam, ctx: &mut SplitContext) -> Result<(), RecordError> {
        let creation = node.creation.borrow();
        match &*creation {
            Creation::Pending => Err(RecordError::UnsupportedValue {
                detail: "deferred value was never resolved to a creation strategy".to_string(),
            }),
            Creation::Object { construct, ctor_args, steps } => {
                for arg in ctor_args {
                    arg.prepare(ctx)?;
                }
                ctx.write_group(|ctx| {
                    let mut locals = Vec::with_capacity(ctor_args.len());
                    for arg in ctor_args {
                        locals.push(arg.load(ctx)?);
                    }
                    let dest = emit_construct(ctx, construct, locals);
                    node.set_origin(ctx.current_proc(), dest);
                    Ok(())
                })?;
                // population runs after construction; a step may load this
                // very node, which resolves through the origin set above
                for step in steps {
                    step.prepare_children(ctx)?;
                    ctx.write_group(|ctx| {
                        let target = self.load(ctx)?;
                        step.emit(ctx, target)
                    })?;
                }
                Ok(())
            }
            other => {
                other.prepare_children(ctx)?;
                ctx.write_group(|ctx| {
                    let dest = other.emit_creation(ctx)?;
                    node.set_origin(ctx.current_proc(), dest);
                    Ok(())
                })
            }
        }
    }

    /// Produce a local holding the value in the current procedure. Must be
    /// called inside an instruction group.
    pub fn load(&self, ctx: &mut SplitContext) -> Result<Local, RecordError> {
        match self {
            DeferredParam::Inline(load) => load.emit(ctx),
            DeferredParam::Stored(node) => {
                if !node.state.borrow().prepared {
                    self.prepare(ctx)?;
                }
                let (origin_proc, origin_local) =
                    node.state.borrow().origin.ok_or_else(|| RecordError::UnsupportedValue {
                        detail: "value participates in a cycle through its own constructor \
                                 arguments"
                            .to_string(),
                    })?;
                if ctx.current_proc() == origin_proc {
                    return Ok(origin_local);
                }
                let existing_index = node.state.borrow().array_index;
                let index = match existing_index {
                    Some(index) => index,
                    None => {
                        // first cross-procedure use: claim a slot and stash
                        // the value in the procedure that created it
                        let index = ctx.alloc_array_index();
                        node.state.borrow_mut().array_index = Some(index);
                        ctx.proc_mut(origin_proc).emit(Op::SharedWrite { index, src: origin_local });
                        index
                    }
                };
                if let Some(local) = ctx.cached_slot(index) {
                    return Ok(local);
                }
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::SharedRead { dest, index, cast: node.decl_class.clone() });
                ctx.cache_slot(index, dest);
                Ok(dest)
            }
        }
    }
}

impl InlineLoad {
    fn prepare_children(&self, ctx: &mut SplitContext) -> Result<(), RecordError> {
        match self {
            InlineLoad::Factory { args, .. } => {
                for arg in args {
                    arg.prepare(ctx)?;
                }
                Ok(())
            }
            InlineLoad::Parameterized { raw, args, owner } => {
                raw.prepare(ctx)?;
                for arg in args {
                    arg.prepare(ctx)?;
                }
                if let Some(owner) = owner {
                    owner.prepare(ctx)?;
                }
                Ok(())
            }
            InlineLoad::GenericArray(component) => component.prepare(ctx),
            InlineLoad::Wildcard { bound, .. } => bound.prepare(ctx),
            _ => Ok(()),
        }
    }

    fn emit(&self, ctx: &mut SplitContext) -> Result<Local, RecordError> {
        match self {
            InlineLoad::Const(val) => Ok(ctx.proc_mut_current().load_const(val.clone())),
            InlineLoad::Enum { class, variant } => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::EnumValue { dest, class: class.clone(), variant: variant.clone() });
                Ok(dest)
            }
            InlineLoad::Url(text) => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::ParseUrl { dest, text: text.clone() });
                Ok(dest)
            }
            InlineLoad::Duration(text) => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::ParseDuration { dest, text: text.clone() });
                Ok(dest)
            }
            InlineLoad::ClassRef(name) => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::LoadClass { dest, name: name.clone() });
                Ok(dest)
            }
            InlineLoad::CtxValue(key) => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::CtxGet { dest, key: key.clone() });
                Ok(dest)
            }
            InlineLoad::Factory { kind, args } => {
                let mut locals = Vec::with_capacity(args.len());
                for arg in args {
                    locals.push(arg.load(ctx)?);
                }
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::Factory { dest, kind: *kind, args: locals });
                Ok(dest)
            }
            InlineLoad::Parameterized { raw, args, owner } => {
                let raw_local = raw.load(ctx)?;
                let mut arg_locals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_locals.push(arg.load(ctx)?);
                }
                let owner_local = match owner {
                    Some(owner) => Some(owner.load(ctx)?),
                    None => None,
                };
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::MakeParameterized {
                    dest,
                    raw: raw_local,
                    args: arg_locals,
                    owner: owner_local,
                });
                Ok(dest)
            }
            InlineLoad::GenericArray(component) => {
                let component = component.load(ctx)?;
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::MakeGenericArray { dest, component });
                Ok(dest)
            }
            InlineLoad::Wildcard { upper, bound } => {
                let bound = bound.load(ctx)?;
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::MakeWildcard { dest, upper: *upper, bound });
                Ok(dest)
            }
        }
    }
}

impl Creation {
    fn prepare_children(&self, ctx: &mut SplitContext) -> Result<(), RecordError> {
        match self {
            Creation::Substituted { serialized, .. } => serialized.prepare(ctx),
            Creation::OptionalOf(inner) | Creation::RuntimeValueWrap(inner) => inner.prepare(ctx),
            Creation::Array { items, .. } => {
                for item in items {
                    item.prepare(ctx)?;
                }
                Ok(())
            }
            Creation::Annotation { args, .. } | Creation::Recorder { args, .. } => {
                for arg in args {
                    arg.prepare(ctx)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn emit_creation(&self, ctx: &mut SplitContext) -> Result<Local, RecordError> {
        match self {
            Creation::Pending | Creation::Object { .. } => unreachable!("handled by caller"),
            Creation::Scalar(val) => Ok(ctx.proc_mut_current().load_const(val.clone())),
            Creation::Loader { loader, value, static_init } => {
                loader.load(ctx.proc_mut_current(), value, *static_init)
            }
            Creation::Substituted { provider, serialized } => {
                let src = serialized.load(ctx)?;
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::Deserialize { dest, provider: provider.clone(), src });
                Ok(dest)
            }
            Creation::OptionalOf(inner) => {
                // the value may be proxy-backed and turn out null at
                // startup, so the nullable factory is always used
                let src = inner.load(ctx)?;
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::Factory { dest, kind: FactoryKind::OptionalOf, args: vec![src] });
                Ok(dest)
            }
            Creation::OptionalEmpty => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::Factory { dest, kind: FactoryKind::OptionalEmpty, args: vec![] });
                Ok(dest)
            }
            Creation::RuntimeValueWrap(inner) => {
                let src = inner.load(ctx)?;
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::WrapRuntimeValue { dest, src });
                Ok(dest)
            }
            Creation::RuntimeValueEmpty => {
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::New {
                    dest,
                    class: crate::object::ty::names::RUNTIME_VALUE.to_string(),
                    ctor: NO_ARG_CTOR,
                    args: vec![],
                });
                Ok(dest)
            }
            Creation::Array { component, items } => {
                let dest = {
                    let proc = ctx.proc_mut_current();
                    let dest = proc.alloc_local();
                    proc.emit(Op::NewArray {
                        dest,
                        component: component.clone(),
                        len: items.len(),
                    });
                    dest
                };
                for (index, item) in items.iter().enumerate() {
                    let src = item.load(ctx)?;
                    ctx.proc_mut_current().emit(Op::ArrayWrite { array: dest, index, src });
                }
                Ok(dest)
            }
            Creation::Annotation { class, args } => {
                let mut locals = Vec::with_capacity(args.len());
                for arg in args {
                    locals.push(arg.load(ctx)?);
                }
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::NewAnnotation { dest, class: class.clone(), args: locals });
                Ok(dest)
            }
            Creation::Recorder { class, ctor, args } => {
                let mut locals = Vec::with_capacity(args.len());
                for arg in args {
                    locals.push(arg.load(ctx)?);
                }
                let proc = ctx.proc_mut_current();
                let dest = proc.alloc_local();
                proc.emit(Op::New { dest, class: class.clone(), ctor: *ctor, args: locals });
                Ok(dest)
            }
        }
    }
}

fn emit_construct(ctx: &mut SplitContext, construct: &Construct, args: Vec<Local>) -> Local {
    match construct {
        Construct::Ctor { class, ctor } => {
            let proc = ctx.proc_mut_current();
            let dest = proc.alloc_local();
            proc.emit(Op::New { dest, class: class.clone(), ctor: *ctor, args });
            dest
        }
        Construct::Default { class } => {
            let proc = ctx.proc_mut_current();
            let dest = proc.alloc_local();
            proc.emit(Op::New { dest, class: class.clone(), ctor: NO_ARG_CTOR, args: vec![] });
            dest
        }
        Construct::Container { class, capacity } => {
            let proc = ctx.proc_mut_current();
            let ctor_args = match capacity {
                Some(n) => vec![proc.load_const(ConstVal::Int(*n as i64))],
                None => vec![],
            };
            let dest = proc.alloc_local();
            proc.emit(Op::New { dest, class: class.clone(), ctor: NO_ARG_CTOR, args: ctor_args });
            dest
        }
    }
}

impl Step {
    fn prepare_children(&self, ctx: &mut SplitContext) -> Result<(), RecordError> {
        match self {
            Step::Add(value) => value.prepare(ctx),
            Step::Put(key, value) => {
                key.prepare(ctx)?;
                value.prepare(ctx)
            }
            Step::SetProperty { value, .. } | Step::SetField { value, .. } => value.prepare(ctx),
            Step::AddToProperty { items, .. } => {
                for item in items {
                    item.prepare(ctx)?;
                }
                Ok(())
            }
            Step::PutToProperty { entries, .. } => {
                for (key, value) in entries {
                    key.prepare(ctx)?;
                    value.prepare(ctx)?;
                }
                Ok(())
            }
        }
    }

    fn emit(&self, ctx: &mut SplitContext, target: Local) -> Result<(), RecordError> {
        match self {
            Step::Add(value) => {
                let item = value.load(ctx)?;
                ctx.proc_mut_current().emit(Op::Add { target, item });
                Ok(())
            }
            Step::Put(key, value) => {
                let key = key.load(ctx)?;
                let value = value.load(ctx)?;
                ctx.proc_mut_current().emit(Op::Put { target, key, value });
                Ok(())
            }
            Step::SetProperty { name, value } => {
                let src = value.load(ctx)?;
                ctx.proc_mut_current().emit(Op::SetProperty {
                    target,
                    name: name.clone(),
                    src,
                });
                Ok(())
            }
            Step::SetField { name, value } => {
                let src = value.load(ctx)?;
                ctx.proc_mut_current().emit(Op::SetField { target, name: name.clone(), src });
                Ok(())
            }
            Step::AddToProperty { name, items } => {
                let container = {
                    let proc = ctx.proc_mut_current();
                    let dest = proc.alloc_local();
                    proc.emit(Op::GetProperty { dest, target, name: name.clone() });
                    dest
                };
                for item in items {
                    let item = item.load(ctx)?;
                    ctx.proc_mut_current().emit(Op::Add { target: container, item });
                }
                Ok(())
            }
            Step::PutToProperty { name, entries } => {
                let container = {
                    let proc = ctx.proc_mut_current();
                    let dest = proc.alloc_local();
                    proc.emit(Op::GetProperty { dest, target, name: name.clone() });
                    dest
                };
                for (key, value) in entries {
                    let key = key.load(ctx)?;
                    let value = value.load(ctx)?;
                    ctx.proc_mut_current().emit(Op::Put { target: container, key, value });
                }
                Ok(())
            }
        }
    }
}
