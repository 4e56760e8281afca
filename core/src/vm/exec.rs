//! file: core/src/vm/exec.rs
//! description: startup-program executor.
//!
//! Decodes nothing and allocates little: procedures run against a
//! per-procedure local frame, the shared object array and the startup
//! context. Heap objects are shared cells, so identity recorded at build
//! time is identity observed here.

use std::cmp::Ordering;

use crate::ir::op::{ConstVal, FactoryKind, Op, NO_ARG_CTOR};
use crate::ir::program::Program;
use crate::object::ty::{names, RtType, WildcardBound};
use crate::object::value::{parse_duration, HeapObj, ObjRef};
use crate::object::RtValue;
use crate::vm::{RuntimeEnv, StartupContext};

const MAX_CALL_DEPTH: usize = 128;

struct ExecState<'a> {
    program: &'a Program,
    shared: Vec<RtValue>,
    depth: usize,
}

pub(crate) fn run_program(
    program: &Program,
    ctx: &mut StartupContext,
    env: &RuntimeEnv,
) -> Result<(), String> {
    let mut state = ExecState { program, shared: Vec::new(), depth: 0 };
    run_proc(&mut state, ctx, env, 0)
}

fn ensure_local(locals: &mut Vec<RtValue>, idx: usize) {
    if idx >= locals.len() {
        locals.resize(idx + 1, RtValue::Null);
    }
}

fn get_local(locals: &[RtValue], idx: usize) -> RtValue {
    locals.get(idx).cloned().unwrap_or(RtValue::Null)
}

fn take_args(locals: &[RtValue], args: &[usize]) -> Vec<RtValue> {
    args.iter().map(|&a| get_local(locals, a)).collect()
}

fn set_local(locals: &mut Vec<RtValue>, idx: usize, value: RtValue) {
    ensure_local(locals, idx);
    locals[idx] = value;
}

fn run_proc(
    state: &mut ExecState,
    ctx: &mut StartupContext,
    env: &RuntimeEnv,
    index: usize,
) -> Result<(), String> {
    let program = state.program;
    let proc = program
        .procs
        .get(index)
        .ok_or_else(|| format!("no procedure #{} in {}", index, program.class_name))?;
    if state.depth >= MAX_CALL_DEPTH {
        return Err(format!("procedure call depth exceeded in {}", program.class_name));
    }
    state.depth += 1;
    let result = run_ops(state, ctx, env, index, &proc.ops);
    state.depth -= 1;
    result.map_err(|e| format!("{} (in {})", e, proc.name))
}

fn run_ops(
    state: &mut ExecState,
    ctx: &mut StartupContext,
    env: &RuntimeEnv,
    proc_index: usize,
    ops: &[Op],
) -> Result<(), String> {
    let mut locals: Vec<RtValue> = Vec::new();
    for op in ops {
        log::trace!("proc #{}: {}", proc_index, op);
        match op {
            Op::Const { dest, val } => {
                let v = match val {
                    ConstVal::Null => RtValue::Null,
                    ConstVal::Bool(b) => RtValue::Bool(*b),
                    ConstVal::Int(i) => RtValue::Int(*i),
                    ConstVal::Float(f) => RtValue::Float(*f),
                    ConstVal::Char(c) => RtValue::Char(*c),
                    ConstVal::Str(s) => RtValue::Str(s.clone()),
                };
                set_local(&mut locals, *dest, v);
            }
            Op::LoadClass { dest, name } => {
                if !env.registry().resolvable(name) {
                    return Err(format!("class '{}' not found at startup", name));
                }
                set_local(&mut locals, *dest, RtValue::Class(name.clone()));
            }
            Op::EnumValue { dest, class, variant } => {
                if let Some(spec) = env.registry().get(class) {
                    if spec.is_enum() && !spec.enum_variants.iter().any(|v| v == variant) {
                        return Err(format!("no enum constant {}::{}", class, variant));
                    }
                }
                set_local(
                    &mut locals,
                    *dest,
                    RtValue::Enum { class: class.clone(), variant: variant.clone() },
                );
            }
            Op::ParseUrl { dest, text } => {
                let parsed = url::Url::parse(text).map_err(|e| format!("malformed URL '{}': {}", text, e))?;
                set_local(&mut locals, *dest, RtValue::Url(parsed));
            }
            Op::ParseDuration { dest, text } => {
                set_local(&mut locals, *dest, RtValue::Duration(parse_duration(text)?));
            }
            Op::CtxGet { dest, key } => {
                let v = ctx
                    .get_value(key)
                    .ok_or_else(|| format!("no value under key '{}' in startup context", key))?;
                set_local(&mut locals, *dest, v);
            }
            Op::CtxPut { key, src } => {
                ctx.put_value(key.clone(), get_local(&locals, *src));
            }
            Op::SetStepName { name } => {
                ctx.set_current_build_step_name(name.clone());
            }
            Op::MakeSharedArray { len } => {
                state.shared = vec![RtValue::Null; *len];
            }
            Op::SharedRead { dest, index, cast } => {
                let v = state
                    .shared
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| format!("shared array index {} out of bounds", index))?;
                if let Some(cast) = cast {
                    if !v.is_null() && !env.registry().assignable(cast, &v.runtime_class()) {
                        return Err(format!(
                            "cannot cast shared[{}] of class '{}' to '{}'",
                            index,
                            v.runtime_class(),
                            cast
                        ));
                    }
                }
                set_local(&mut locals, *dest, v);
            }
            Op::SharedWrite { index, src } => {
                if *index >= state.shared.len() {
                    return Err(format!("shared array index {} out of bounds", index));
                }
                state.shared[*index] = get_local(&locals, *src);
            }
            Op::New { dest, class, ctor, args } => {
                let argv = take_args(&locals, args);
                let v = construct(env, class, *ctor, argv)?;
                set_local(&mut locals, *dest, v);
            }
            Op::Factory { dest, kind, args } => {
                let argv = take_args(&locals, args);
                set_local(&mut locals, *dest, factory(*kind, argv)?);
            }
            Op::NewArray { dest, component, len } => {
                set_local(
                    &mut locals,
                    *dest,
                    RtValue::Ref(ObjRef::new(HeapObj::Array {
                        component: component.clone(),
                        items: vec![RtValue::Null; *len],
                    })),
                );
            }
            Op::ArrayWrite { array, index, src } => {
                let value = get_local(&locals, *src);
                let target = get_local(&locals, *array);
                let r = target
                    .as_ref()
                    .ok_or_else(|| "ArrayWrite target is not an array".to_string())?;
                match &mut *r.get_mut() {
                    HeapObj::Array { items, .. } => {
                        if *index >= items.len() {
                            return Err(format!("array index {} out of bounds", index));
                        }
                        items[*index] = value;
                    }
                    other => {
                        return Err(format!("ArrayWrite target is {:?}, not an array", other))
                    }
                };
            }
            Op::NewAnnotation { dest, class, args } => {
                let argv = take_args(&locals, args);
                let spec = env
                    .registry()
                    .get(class)
                    .ok_or_else(|| format!("annotation class '{}' not found", class))?;
                if spec.annotation_members.len() != argv.len() {
                    return Err(format!(
                        "annotation literal for '{}' takes {} values, got {}",
                        class,
                        spec.annotation_members.len(),
                        argv.len()
                    ));
                }
                let values = spec
                    .annotation_members
                    .iter()
                    .map(|m| m.name.clone())
                    .zip(argv)
                    .collect();
                set_local(
                    &mut locals,
                    *dest,
                    RtValue::Ref(ObjRef::new(HeapObj::Annotation { class: class.clone(), values })),
                );
            }
            Op::WrapRuntimeValue { dest, src } => {
                let inner = get_local(&locals, *src);
                set_local(&mut locals, *dest, RtValue::runtime_value(inner));
            }
            Op::Deserialize { dest, provider, src } => {
                let sub = env
                    .substitution(provider)
                    .ok_or_else(|| format!("substitution provider '{}' not registered", provider))?;
                let v = sub.deserialize(get_local(&locals, *src))?;
                set_local(&mut locals, *dest, v);
            }
            Op::MakeParameterized { dest, raw, args, owner } => {
                let raw = value_to_type(get_local(&locals, *raw))?;
                let args = args
                    .iter()
                    .map(|&a| value_to_type(get_local(&locals, a)))
                    .collect::<Result<Vec<_>, _>>()?;
                let owner = match owner {
                    Some(o) => Some(Box::new(value_to_type(get_local(&locals, *o))?)),
                    None => None,
                };
                set_local(
                    &mut locals,
                    *dest,
                    RtValue::Type(RtType::Parameterized { raw: Box::new(raw), args, owner }),
                );
            }
            Op::MakeGenericArray { dest, component } => {
                let component = value_to_type(get_local(&locals, *component))?;
                set_local(
                    &mut locals,
                    *dest,
                    RtValue::Type(RtType::GenericArray(Box::new(component))),
                );
            }
            Op::MakeWildcard { dest, upper, bound } => {
                let bound = Box::new(value_to_type(get_local(&locals, *bound))?);
                let bound =
                    if *upper { WildcardBound::Upper(bound) } else { WildcardBound::Lower(bound) };
                set_local(&mut locals, *dest, RtValue::Type(RtType::Wildcard(bound)));
            }
            Op::Add { target, item } => {
                let value = get_local(&locals, *item);
                let target = get_local(&locals, *target);
                add_to_collection(&target, value)?;
            }
            Op::Put { target, key, value } => {
                let k = get_local(&locals, *key);
                let v = get_local(&locals, *value);
                let target = get_local(&locals, *target);
                put_to_map(&target, k, v)?;
            }
            Op::SetProperty { target, name, src } | Op::SetField { target, name, src } => {
                let value = get_local(&locals, *src);
                let target = get_local(&locals, *target);
                let r = target
                    .as_ref()
                    .ok_or_else(|| format!("cannot set '{}' on a non-object", name))?;
                match &mut *r.get_mut() {
                    HeapObj::Struct { values, .. } => {
                        values.insert(name.clone(), value);
                    }
                    other => return Err(format!("cannot set '{}' on {:?}", name, other)),
                };
            }
            Op::GetProperty { dest, target, name } => {
                let target = get_local(&locals, *target);
                let r = target
                    .as_ref()
                    .ok_or_else(|| format!("cannot read '{}' from a non-object", name))?;
                let v = match &*r.get() {
                    HeapObj::Struct { values, .. } => {
                        values.get(name).cloned().unwrap_or(RtValue::Null)
                    }
                    other => return Err(format!("cannot read '{}' from {:?}", name, other)),
                };
                set_local(&mut locals, *dest, v);
            }
            Op::Invoke { dest, recorder, class, method, args } => {
                let argv = take_args(&locals, args);
                let target = get_local(&locals, *recorder);
                let r = target
                    .as_ref()
                    .ok_or_else(|| format!("Invoke target for {}::{} is not a recorder", class, method))?;
                let result = match &mut *r.get_mut() {
                    HeapObj::Recorder { instance, .. } => instance
                        .dispatch(method, argv)
                        .map_err(|e| format!("recorder {}::{} failed: {}", class, method, e))?,
                    other => {
                        return Err(format!(
                            "Invoke target for {}::{} is {:?}, not a recorder",
                            class, method, other
                        ))
                    }
                };
                if let Some(dest) = dest {
                    set_local(&mut locals, *dest, result);
                }
            }
            Op::CallProc { index } => {
                run_proc(state, ctx, env, *index)?;
            }
            Op::Ret => break,
        }
    }
    Ok(())
}

fn construct(
    env: &RuntimeEnv,
    class: &str,
    ctor: usize,
    args: Vec<RtValue>,
) -> Result<RtValue, String> {
    // recorder classes are instantiated through their registered factory
    if let Some(factory) = env.recorder_factory(class) {
        let instance = factory(args)
            .map_err(|e| format!("failed to construct recorder '{}': {}", class, e))?;
        return Ok(RtValue::Ref(ObjRef::new(HeapObj::Recorder {
            class: class.to_string(),
            instance,
        })));
    }
    match class {
        names::ARRAY_LIST => {
            let capacity = match args.first() {
                Some(RtValue::Int(n)) => *n as usize,
                _ => 0,
            };
            Ok(RtValue::Ref(ObjRef::new(HeapObj::List {
                class: names::ARRAY_LIST.to_string(),
                items: Vec::with_capacity(capacity),
            })))
        }
        names::LINKED_HASH_SET | names::TREE_SET => Ok(RtValue::Ref(ObjRef::new(HeapObj::Set {
            class: class.to_string(),
            items: Vec::new(),
        }))),
        names::LINKED_HASH_MAP | names::TREE_MAP => Ok(RtValue::Ref(ObjRef::new(HeapObj::Map {
            class: class.to_string(),
            entries: Vec::new(),
            custom_comparator: false,
        }))),
        names::RUNTIME_VALUE => {
            let inner = args.into_iter().next().unwrap_or(RtValue::Null);
            Ok(RtValue::runtime_value(inner))
        }
        _ => {
            let spec = env
                .registry()
                .get(class)
                .ok_or_else(|| format!("cannot construct unknown class '{}'", class))?;
            let mut values = std::collections::BTreeMap::new();
            if ctor == NO_ARG_CTOR {
                if !spec.has_default_ctor() {
                    return Err(format!("class '{}' has no no-arg constructor", class));
                }
                if !args.is_empty() {
                    return Err(format!(
                        "no-arg constructor of '{}' invoked with {} arguments",
                        class,
                        args.len()
                    ));
                }
            } else if let Some(ctor_spec) = spec.ctors.get(ctor) {
                if ctor_spec.params.len() != args.len() {
                    return Err(format!(
                        "constructor #{} of '{}' takes {} arguments, got {}",
                        ctor,
                        class,
                        ctor_spec.params.len(),
                        args.len()
                    ));
                }
                for (i, (param, arg)) in ctor_spec.params.iter().zip(args).enumerate() {
                    let key = match &param.name {
                        Some(name) => name.clone(),
                        None => format!("#{}", i),
                    };
                    values.insert(key, arg);
                }
            } else if ctor != 0 || !args.is_empty() {
                return Err(format!("no constructor #{} on '{}'", ctor, class));
            }
            // constructors bring their container-typed members up as empty
            // collections, which read-only population steps rely on
            for prop in &spec.properties {
                if !values.contains_key(&prop.name) {
                    if let Some(init) = default_container(&prop.ty) {
                        values.insert(prop.name.clone(), init);
                    }
                }
            }
            for field in &spec.fields {
                if field.public && !values.contains_key(&field.name) {
                    if let Some(init) = default_container(&field.ty) {
                        values.insert(field.name.clone(), init);
                    }
                }
            }
            Ok(RtValue::Ref(ObjRef::new(HeapObj::Struct { class: class.to_string(), values })))
        }
    }
}

fn default_container(ty: &str) -> Option<RtValue> {
    let obj = match ty {
        names::LIST | names::ARRAY_LIST => {
            HeapObj::List { class: names::ARRAY_LIST.to_string(), items: Vec::new() }
        }
        names::SET | names::LINKED_HASH_SET => {
            HeapObj::Set { class: names::LINKED_HASH_SET.to_string(), items: Vec::new() }
        }
        names::SORTED_SET | names::TREE_SET => {
            HeapObj::Set { class: names::TREE_SET.to_string(), items: Vec::new() }
        }
        names::MAP | names::LINKED_HASH_MAP => HeapObj::Map {
            class: names::LINKED_HASH_MAP.to_string(),
            entries: Vec::new(),
            custom_comparator: false,
        },
        names::SORTED_MAP | names::TREE_MAP => HeapObj::Map {
            class: names::TREE_MAP.to_string(),
            entries: Vec::new(),
            custom_comparator: false,
        },
        _ => return None,
    };
    Some(RtValue::Ref(ObjRef::new(obj)))
}

fn factory(kind: FactoryKind, mut args: Vec<RtValue>) -> Result<RtValue, String> {
    let mut next = |n: usize| -> Result<RtValue, String> {
        if n < args.len() {
            Ok(std::mem::replace(&mut args[n], RtValue::Null))
        } else {
            Err(format!("factory {:?} is missing argument {}", kind, n))
        }
    };
    let v = match kind {
        FactoryKind::EmptyList => heap_list(names::EMPTY_LIST, Vec::new()),
        FactoryKind::EmptySet => heap_set(names::EMPTY_SET, Vec::new()),
        FactoryKind::EmptySortedSet => heap_set(names::EMPTY_SORTED_SET, Vec::new()),
        FactoryKind::EmptyMap => heap_map(names::EMPTY_MAP, Vec::new()),
        FactoryKind::EmptySortedMap => heap_map(names::EMPTY_SORTED_MAP, Vec::new()),
        FactoryKind::SingletonList => heap_list(names::SINGLETON_LIST, vec![next(0)?]),
        FactoryKind::SingletonSet => heap_set(names::SINGLETON_SET, vec![next(0)?]),
        FactoryKind::SingletonMap => heap_map(names::SINGLETON_MAP, vec![(next(0)?, next(1)?)]),
        FactoryKind::OptionalOf => match next(0)? {
            RtValue::Null => RtValue::Optional(None),
            other => RtValue::Optional(Some(Box::new(other))),
        },
        FactoryKind::OptionalEmpty => RtValue::Optional(None),
        FactoryKind::UnboundedWildcard => RtValue::Type(RtType::Wildcard(WildcardBound::Unbounded)),
    };
    Ok(v)
}

fn heap_list(class: &str, items: Vec<RtValue>) -> RtValue {
    RtValue::Ref(ObjRef::new(HeapObj::List { class: class.to_string(), items }))
}

fn heap_set(class: &str, items: Vec<RtValue>) -> RtValue {
    RtValue::Ref(ObjRef::new(HeapObj::Set { class: class.to_string(), items }))
}

fn heap_map(class: &str, entries: Vec<(RtValue, RtValue)>) -> RtValue {
    RtValue::Ref(ObjRef::new(HeapObj::Map {
        class: class.to_string(),
        entries,
        custom_comparator: false,
    }))
}

fn immutable_container(class: &str) -> bool {
    class.starts_with("empty-") || class.starts_with("singleton-")
}

fn add_to_collection(target: &RtValue, value: RtValue) -> Result<(), String> {
    let r = target.as_ref().ok_or_else(|| "Add target is not a collection".to_string())?;
    match &mut *r.get_mut() {
        HeapObj::List { class, items } => {
            if immutable_container(class) {
                return Err(format!("cannot add to immutable container '{}'", class));
            }
            items.push(value);
            Ok(())
        }
        HeapObj::Set { class, items } => {
            if immutable_container(class) {
                return Err(format!("cannot add to immutable container '{}'", class));
            }
            if items.iter().any(|i| *i == value) {
                return Ok(());
            }
            if class == names::TREE_SET {
                let pos = items
                    .iter()
                    .position(|i| matches!(cmp_values(i, &value), Some(Ordering::Greater)))
                    .unwrap_or(items.len());
                items.insert(pos, value);
            } else {
                items.push(value);
            }
            Ok(())
        }
        other => Err(format!("Add target is {:?}, not a collection", other)),
    }
}

fn put_to_map(target: &RtValue, key: RtValue, value: RtValue) -> Result<(), String> {
    let r = target.as_ref().ok_or_else(|| "Put target is not a map".to_string())?;
    match &mut *r.get_mut() {
        HeapObj::Map { class, entries, .. } => {
            if immutable_container(class) {
                return Err(format!("cannot put into immutable container '{}'", class));
            }
            if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return Ok(());
            }
            if class == names::TREE_MAP {
                let pos = entries
                    .iter()
                    .position(|(k, _)| matches!(cmp_values(k, &key), Some(Ordering::Greater)))
                    .unwrap_or(entries.len());
                entries.insert(pos, (key, value));
            } else {
                entries.push((key, value));
            }
            Ok(())
        }
        other => Err(format!("Put target is {:?}, not a map", other)),
    }
}

/// Natural ordering over comparable scalars; anything else is unordered
/// and keeps insertion position.
fn cmp_values(a: &RtValue, b: &RtValue) -> Option<Ordering> {
    match (a, b) {
        (RtValue::Int(x), RtValue::Int(y)) => Some(x.cmp(y)),
        (RtValue::Float(x), RtValue::Float(y)) => x.partial_cmp(y),
        (RtValue::Str(x), RtValue::Str(y)) => Some(x.cmp(y)),
        (RtValue::Char(x), RtValue::Char(y)) => Some(x.cmp(y)),
        (RtValue::Bool(x), RtValue::Bool(y)) => Some(x.cmp(y)),
        (RtValue::Duration(x), RtValue::Duration(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn value_to_type(v: RtValue) -> Result<RtType, String> {
    match v {
        RtValue::Class(name) => Ok(RtType::Class(name)),
        RtValue::Type(t) => Ok(t),
        other => Err(format!("{:?} is not a type component", other)),
    }
}
