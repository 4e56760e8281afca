//! file: core/src/record/serialize.rs
//! description: type-directed serialization dispatch.
//!
//! Given `(value, expected type, relaxed flag)` this chooses the deferred
//! node that will recreate the value at startup. The priority order of the
//! branches is load-bearing: loaders come before everything but null,
//! the empty/singleton container family before substitutions, and the
//! complex-object path is the catch-all. Identity-shared values resolve to
//! one node through the deduplication map; complex objects register their
//! node before recursing so self-referential graphs terminate.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::RecordError;
use crate::object::ty::{self, names, RtType, WildcardBound};
use crate::object::value::{format_duration, HeapObj, ObjRef, ValueKey};
use crate::object::{RtValue, TypeRegistry};
use crate::record::deferred::{
    inline, stored, Construct, Creation, Deferred, InlineLoad, Step,
};
use crate::record::hooks::Hooks;
use crate::ir::op::{ConstVal, FactoryKind};

const MAX_RECORDED_STRING: usize = 65535;

#[derive(PartialEq, Eq, Hash)]
enum DedupKey {
    Identity(usize),
    Proxy(String),
    Value(ValueKey),
}

pub(crate) struct Serializer<'a> {
    registry: &'a TypeRegistry,
    hooks: &'a Hooks,
    static_init: bool,
    use_identity: bool,
    map: HashMap<DedupKey, Deferred>,
}

impl<'a> Serializer<'a> {
    pub fn new(
        registry: &'a TypeRegistry,
        hooks: &'a Hooks,
        static_init: bool,
        use_identity: bool,
    ) -> Self {
        Serializer { registry, hooks, static_init, use_identity, map: HashMap::new() }
    }

    /// Entry point: produce (or reuse) the deferred node for a value.
    pub fn load(
        &mut self,
        value: &RtValue,
        expected: &str,
        relaxed: bool,
    ) -> Result<Deferred, RecordError> {
        if let Some(key) = self.key_for(value) {
            if let Some(existing) = self.map.get(&key) {
                return Ok(existing.clone());
            }
        }
        let node = self.load_impl(value, expected, relaxed)?;
        if let Some(key) = self.key_for(value) {
            // complex objects registered themselves mid-build; keep the
            // first node either way
            self.map.entry(key).or_insert_with(|| node.clone());
        }
        Ok(node)
    }

    fn key_for(&self, value: &RtValue) -> Option<DedupKey> {
        if let RtValue::Proxy(p) = value {
            return Some(DedupKey::Proxy(p.key().to_string()));
        }
        if self.use_identity {
            value.as_ref().map(|r| DedupKey::Identity(r.identity()))
        } else if value.is_null() {
            None
        } else {
            Some(DedupKey::Value(ValueKey(value.clone())))
        }
    }

    fn load_impl(
        &mut self,
        value: &RtValue,
        expected: &str,
        relaxed: bool,
    ) -> Result<Deferred, RecordError> {
        if value.is_null() {
            return Ok(inline(InlineLoad::Const(ConstVal::Null)));
        }

        // pluggable loaders trump every other strategy
        if let Some(loader) = self.hooks.find_loader(value, self.static_init) {
            let decl = self.decl_class(&value.runtime_class(), expected);
            return Ok(stored(
                decl,
                Creation::Loader {
                    loader,
                    value: value.clone(),
                    static_init: self.static_init,
                },
            ));
        }

        // the empty/singleton container family loads through factory calls
        if let Some(node) = self.try_collections_family(value, relaxed)? {
            return Ok(node);
        }

        // substitutions keyed on the runtime class or the expected type
        let runtime_class = value.runtime_class();
        if let Some(holder) = self.hooks.substitution_for(&runtime_class, expected) {
            let serialized_value = holder.instance.serialize(value).map_err(|e| {
                RecordError::UnsupportedValue {
                    detail: format!("failed to substitute value of '{}': {}", runtime_class, e),
                }
            })?;
            let to = holder.to.clone();
            let provider = holder.provider.clone();
            let serialized = self.load(&serialized_value, &to, relaxed)?;
            let decl = self.decl_class(&runtime_class, expected);
            return Ok(stored(decl, Creation::Substituted { provider, serialized }));
        }

        match value {
            RtValue::Optional(opt) => {
                let decl = self.decl_class(names::OPTION, expected);
                match opt {
                    Some(inner) => {
                        let inner = self.load(inner, names::OBJECT, relaxed)?;
                        Ok(stored(decl, Creation::OptionalOf(inner)))
                    }
                    None => Ok(stored(decl, Creation::OptionalEmpty)),
                }
            }
            RtValue::Str(s) => {
                if s.len() > MAX_RECORDED_STRING {
                    return Err(RecordError::OversizedString { len: s.len() });
                }
                Ok(inline(InlineLoad::Const(ConstVal::Str(s.clone()))))
            }
            RtValue::Url(u) => Ok(inline(InlineLoad::Url(u.as_str().to_string()))),
            RtValue::Enum { class, variant } => Ok(inline(InlineLoad::Enum {
                class: class.clone(),
                variant: variant.clone(),
            })),
            RtValue::Proxy(p) => {
                if self.static_init && !p.is_static_init() {
                    return Err(RecordError::CrossPhaseProxy {
                        key: p.key().to_string(),
                        position: 0,
                        method: "(nested argument)".to_string(),
                    });
                }
                Ok(inline(InlineLoad::CtxValue(p.key().to_string())))
            }
            RtValue::Duration(d) => Ok(inline(InlineLoad::Duration(format_duration(d)))),
            RtValue::Class(name) => {
                let original = self.hooks.original_class_name(name).to_string();
                Ok(inline(InlineLoad::ClassRef(original)))
            }
            RtValue::Type(t) => self.load_type(t, relaxed),
            RtValue::Bool(b) => Ok(inline(InlineLoad::Const(ConstVal::Bool(*b)))),
            RtValue::Int(i) => Ok(inline(InlineLoad::Const(ConstVal::Int(*i)))),
            RtValue::Float(f) => Ok(inline(InlineLoad::Const(ConstVal::Float(*f)))),
            RtValue::Char(c) => Ok(inline(InlineLoad::Const(ConstVal::Char(*c)))),
            RtValue::Ref(obj) => self.load_heap(obj, expected, relaxed),
            RtValue::Null => unreachable!("handled above"),
        }
    }

    fn load_heap(
        &mut self,
        obj: &ObjRef,
        expected: &str,
        relaxed: bool,
    ) -> Result<Deferred, RecordError> {
        enum Kind {
            BoxedScalar(ConstVal),
            Array { component: String, items: Vec<RtValue> },
            Annotation { class: String, values: BTreeMap<String, RtValue> },
            RuntimeValue(RtValue),
            Complex,
        }

        let kind = {
            let heap = obj.get();
            match &*heap {
                HeapObj::Boxed(inner) => match inner {
                    RtValue::Bool(b) => Kind::BoxedScalar(ConstVal::Bool(*b)),
                    RtValue::Int(i) => Kind::BoxedScalar(ConstVal::Int(*i)),
                    RtValue::Float(f) => Kind::BoxedScalar(ConstVal::Float(*f)),
                    RtValue::Char(c) => Kind::BoxedScalar(ConstVal::Char(*c)),
                    RtValue::Str(s) => {
                        if s.len() > MAX_RECORDED_STRING {
                            return Err(RecordError::OversizedString { len: s.len() });
                        }
                        Kind::BoxedScalar(ConstVal::Str(s.clone()))
                    }
                    other => {
                        return Err(RecordError::UnsupportedValue {
                            detail: format!("boxed value {:?} is not a scalar", other),
                        })
                    }
                },
                HeapObj::Array { component, items } => {
                    Kind::Array { component: component.clone(), items: items.clone() }
                }
                HeapObj::Annotation { class, values } => {
                    Kind::Annotation { class: class.clone(), values: values.clone() }
                }
                HeapObj::RuntimeValue(inner) => Kind::RuntimeValue(inner.clone()),
                HeapObj::Recorder { .. } => {
                    return Err(RecordError::UnsupportedValue {
                        detail: "a live recorder instance cannot be recorded as a value"
                            .to_string(),
                    })
                }
                _ => Kind::Complex,
            }
        };

        match kind {
            Kind::BoxedScalar(val) => {
                // shared by identity at build time, so the replay parks it
                // in the array and every consumer reads the same slot
                let class = obj.get().class_name();
                Ok(stored(Some(class), Creation::Scalar(val)))
            }
            Kind::Array { component, items } => {
                let mut nodes = Vec::with_capacity(items.len());
                for item in &items {
                    nodes.push(self.load(item, &component, relaxed)?);
                }
                let decl = self.decl_class(&ty::array_of(&component), expected);
                Ok(stored(decl, Creation::Array { component, items: nodes }))
            }
            Kind::Annotation { class, values } => {
                let spec = self
                    .registry
                    .get(&class)
                    .ok_or_else(|| RecordError::UnknownClass { name: class.clone() })?
                    .clone();
                let mut args = Vec::with_capacity(spec.annotation_members.len());
                for member in &spec.annotation_members {
                    let value = match values.get(&member.name) {
                        Some(v) => v.clone(),
                        None => match &member.default {
                            Some(d) => d.clone(),
                            None => {
                                return Err(RecordError::UnsupportedValue {
                                    detail: format!(
                                        "no value or default for member '{}' of annotation '{}'",
                                        member.name, class
                                    ),
                                })
                            }
                        },
                    };
                    args.push(self.load(&value, &member.ty, relaxed)?);
                }
                let decl = self.decl_class(&class, expected);
                Ok(stored(decl, Creation::Annotation { class, args }))
            }
            Kind::RuntimeValue(inner) => {
                let inner = self.load(&inner, names::OBJECT, relaxed)?;
                Ok(stored(
                    Some(names::RUNTIME_VALUE.to_string()),
                    Creation::RuntimeValueWrap(inner),
                ))
            }
            Kind::Complex => self.load_complex(obj, expected, relaxed),
        }
    }

    fn try_collections_family(
        &mut self,
        value: &RtValue,
        relaxed: bool,
    ) -> Result<Option<Deferred>, RecordError> {
        let obj = match value.as_ref() {
            Some(obj) => obj,
            None => return Ok(None),
        };
        enum Fam {
            Empty(FactoryKind),
            SingletonList(RtValue),
            SingletonSet(RtValue),
            SingletonMap(RtValue, RtValue),
        }
        let fam = {
            let heap = obj.get();
            match &*heap {
                HeapObj::List { class, items } => match class.as_str() {
                    names::EMPTY_LIST => Some(Fam::Empty(FactoryKind::EmptyList)),
                    names::SINGLETON_LIST => {
                        Some(Fam::SingletonList(singleton_element(items, class)?))
                    }
                    _ => None,
                },
                HeapObj::Set { class, items } => match class.as_str() {
                    names::EMPTY_SET => Some(Fam::Empty(FactoryKind::EmptySet)),
                    names::EMPTY_SORTED_SET => Some(Fam::Empty(FactoryKind::EmptySortedSet)),
                    names::SINGLETON_SET => {
                        Some(Fam::SingletonSet(singleton_element(items, class)?))
                    }
                    _ => None,
                },
                HeapObj::Map { class, entries, .. } => match class.as_str() {
                    names::EMPTY_MAP => Some(Fam::Empty(FactoryKind::EmptyMap)),
                    names::EMPTY_SORTED_MAP => Some(Fam::Empty(FactoryKind::EmptySortedMap)),
                    names::SINGLETON_MAP => {
                        if entries.len() != 1 {
                            return Err(RecordError::UnsupportedValue {
                                detail: format!("singleton map with {} entries", entries.len()),
                            });
                        }
                        let (k, v) = entries[0].clone();
                        Some(Fam::SingletonMap(k, v))
                    }
                    _ => None,
                },
                _ => None,
            }
        };
        let node = match fam {
            None => return Ok(None),
            Some(Fam::Empty(kind)) => inline(InlineLoad::Factory { kind, args: vec![] }),
            Some(Fam::SingletonList(element)) => {
                let element = self.load(&element, names::OBJECT, relaxed)?;
                inline(InlineLoad::Factory { kind: FactoryKind::SingletonList, args: vec![element] })
            }
            Some(Fam::SingletonSet(element)) => {
                let element = self.load(&element, names::OBJECT, relaxed)?;
                inline(InlineLoad::Factory { kind: FactoryKind::SingletonSet, args: vec![element] })
            }
            Some(Fam::SingletonMap(k, v)) => {
                let k = self.load(&k, names::OBJECT, relaxed)?;
                let v = self.load(&v, names::OBJECT, relaxed)?;
                inline(InlineLoad::Factory { kind: FactoryKind::SingletonMap, args: vec![k, v] })
            }
        };
        Ok(Some(node))
    }

    fn load_type(&mut self, t: &RtType, relaxed: bool) -> Result<Deferred, RecordError> {
        match t {
            RtType::Class(name) => {
                let original = self.hooks.original_class_name(name).to_string();
                Ok(inline(InlineLoad::ClassRef(original)))
            }
            RtType::Parameterized { raw, args, owner } => {
                let raw = self.load_type_component(raw, relaxed)?;
                let args = args
                    .iter()
                    .map(|a| self.load_type_component(a, relaxed))
                    .collect::<Result<Vec<_>, _>>()?;
                let owner = match owner {
                    Some(owner) => Some(self.load_type_component(owner, relaxed)?),
                    None => None,
                };
                Ok(inline(InlineLoad::Parameterized { raw, args, owner }))
            }
            RtType::GenericArray(component) => {
                let component = self.load_type_component(component, relaxed)?;
                Ok(inline(InlineLoad::GenericArray(component)))
            }
            RtType::Wildcard(WildcardBound::Unbounded) => Ok(inline(InlineLoad::Factory {
                kind: FactoryKind::UnboundedWildcard,
                args: vec![],
            })),
            RtType::Wildcard(WildcardBound::Upper(bound)) => {
                let bound = self.load_type_component(bound, relaxed)?;
                Ok(inline(InlineLoad::Wildcard { upper: true, bound }))
            }
            RtType::Wildcard(WildcardBound::Lower(bound)) => {
                let bound = self.load_type_component(bound, relaxed)?;
                Ok(inline(InlineLoad::Wildcard { upper: false, bound }))
            }
        }
    }

    /// Components are routed back through `load` so identical components
    /// deduplicate like any other value.
    fn load_type_component(
        &mut self,
        t: &RtType,
        relaxed: bool,
    ) -> Result<Deferred, RecordError> {
        match t {
            RtType::Class(name) => {
                self.load(&RtValue::Class(name.clone()), names::TYPE, relaxed)
            }
            other => self.load(&RtValue::Type(other.clone()), names::TYPE, relaxed),
        }
    }

    fn load_complex(
        &mut self,
        obj: &ObjRef,
        expected: &str,
        relaxed: bool,
    ) -> Result<Deferred, RecordError> {
        enum Snap {
            List { class: String, items: Vec<RtValue> },
            Set { class: String, items: Vec<RtValue> },
            Map { class: String, entries: Vec<(RtValue, RtValue)> },
            Struct { class: String, values: BTreeMap<String, RtValue> },
        }

        let snap = {
            let heap = obj.get();
            match &*heap {
                HeapObj::List { class, items } => {
                    Snap::List { class: class.clone(), items: items.clone() }
                }
                HeapObj::Set { class, items } => {
                    Snap::Set { class: class.clone(), items: items.clone() }
                }
                HeapObj::Map { class, entries, custom_comparator } => {
                    if *custom_comparator {
                        return Err(RecordError::CustomComparator { class: class.clone() });
                    }
                    Snap::Map { class: class.clone(), entries: entries.clone() }
                }
                HeapObj::Struct { class, values } => {
                    Snap::Struct { class: class.clone(), values: values.clone() }
                }
                other => {
                    return Err(RecordError::UnsupportedValue {
                        detail: format!("{:?} has no serialization strategy", other),
                    })
                }
            }
        };

        let value_class = match &snap {
            Snap::List { class, .. }
            | Snap::Set { class, .. }
            | Snap::Map { class, .. }
            | Snap::Struct { class, .. } => class.clone(),
        };

        // the node must exist before any child is loaded so that cycles
        // back to this object resolve to it
        let decl = self.decl_class(&value_class, expected);
        let node = stored(decl, Creation::Pending);
        if let Some(key) = self.key_for(&RtValue::Ref(obj.clone())) {
            self.map.insert(key, node.clone());
        }

        let mut steps: Vec<Step> = Vec::new();
        let mut relaxed_ok = false;
        match &snap {
            Snap::List { items, .. } | Snap::Set { items, .. } => {
                for item in items {
                    let element = self.load(item, &item.runtime_class(), relaxed)?;
                    steps.push(Step::Add(element));
                }
                relaxed_ok = true;
            }
            Snap::Map { entries, .. } => {
                for (k, v) in entries {
                    let k = self.load(k, &k.runtime_class(), relaxed)?;
                    let v = self.load(v, &v.runtime_class(), relaxed)?;
                    steps.push(Step::Put(k, v));
                }
                relaxed_ok = true;
            }
            Snap::Struct { .. } => {}
        }

        let struct_values: BTreeMap<String, RtValue> = match &snap {
            Snap::Struct { values, .. } => values.clone(),
            _ => BTreeMap::new(),
        };

        // constructor selection, strategies (a) through (d)
        let spec = self.registry.get(&value_class).cloned();
        let mut ctor_sel: Option<usize> = None;
        let mut ctor_params: Vec<crate::object::class::CtorParam> = Vec::new();
        let mut ctor_slots: Vec<Option<Deferred>> = Vec::new();
        let mut name_map: HashMap<String, usize> = HashMap::new();

        if let Some(ndc) = self.hooks.non_default_ctors.get(&value_class) {
            let spec = spec
                .as_ref()
                .ok_or_else(|| RecordError::UnknownClass { name: value_class.clone() })?;
            let ctor_spec = spec
                .ctors
                .get(ndc.ctor_index)
                .ok_or_else(|| RecordError::NoViableConstructor { class: value_class.clone() })?;
            let extracted = (ndc.extractor)(&RtValue::Ref(obj.clone()));
            if extracted.len() != ctor_spec.params.len() {
                return Err(RecordError::ExtractorArity {
                    class: value_class.clone(),
                    expected: ctor_spec.params.len(),
                    actual: extracted.len(),
                });
            }
            for (param, arg) in ctor_spec.params.iter().zip(&extracted) {
                let loaded = self.load(arg, &param.ty, relaxed)?;
                ctor_slots.push(Some(loaded));
            }
            ctor_sel = Some(ndc.ctor_index);
            ctor_params = ctor_spec.params.clone();
            // extractor output is authoritative; properties and fields are
            // not matched against this constructor
        } else if self.hooks.ctor_recordable.contains(&value_class) {
            let spec = spec
                .as_ref()
                .ok_or_else(|| RecordError::UnknownClass { name: value_class.clone() })?;
            let mut widest: Option<usize> = None;
            let mut ties = 0;
            for (i, c) in spec.ctors.iter().enumerate() {
                match widest {
                    None => widest = Some(i),
                    Some(w) => {
                        if c.params.len() > spec.ctors[w].params.len() {
                            widest = Some(i);
                            ties = 0;
                        } else if c.params.len() == spec.ctors[w].params.len() {
                            ties += 1;
                        }
                    }
                }
            }
            let index = match (widest, ties) {
                (Some(i), 0) => i,
                _ => {
                    return Err(RecordError::AmbiguousConstructor { class: value_class.clone() })
                }
            };
            let ctor_spec = &spec.ctors[index];
            ctor_sel = Some(index);
            ctor_params = ctor_spec.params.clone();
            ctor_slots = vec![None; ctor_spec.params.len()];
            for (i, p) in ctor_spec.params.iter().enumerate() {
                if let Some(name) = &p.name {
                    name_map.insert(name.clone(), i);
                }
            }
        } else if let Some(spec) = &spec {
            let mut selected = if spec.ctors.len() == 1 { Some(0) } else { None };
            if let Some(ri) = spec.ctors.iter().position(|c| c.recordable) {
                selected = Some(ri);
            }
            if let Some(index) = selected {
                let ctor_spec = &spec.ctors[index];
                for (i, p) in ctor_spec.params.iter().enumerate() {
                    if let Some(name) = &p.name {
                        name_map.insert(name.clone(), i);
                    }
                }
                if name_map.len() != ctor_spec.params.len() {
                    return Err(RecordError::MissingParameterNames {
                        class: value_class.clone(),
                    });
                }
                ctor_sel = Some(index);
                ctor_params = ctor_spec.params.clone();
                ctor_slots = vec![None; ctor_spec.params.len()];
            }
        }

        // properties, in declaration order
        let mut handled: HashSet<String> = HashSet::new();
        if let Some(spec) = &spec {
            for prop in &spec.properties {
                if prop.ignored {
                    continue;
                }
                if let Some(field) = spec.find_field(&prop.name) {
                    if field.ignored {
                        continue;
                    }
                }
                let ctor_idx = name_map.remove(&prop.name);
                let writable = prop.setter_ty.is_some();
                if !writable && ctor_idx.is_none() {
                    if ty::is_collection_type(&prop.ty) {
                        handled.insert(prop.name.clone());
                        if let Some(current) = struct_values.get(&prop.name) {
                            let items = collection_items(current);
                            if !items.is_empty() {
                                let mut nodes = Vec::with_capacity(items.len());
                                for item in &items {
                                    nodes.push(self.load(item, names::OBJECT, relaxed)?);
                                }
                                log::debug!(
                                    "appending {} elements into read-only property '{}' of '{}'",
                                    nodes.len(),
                                    prop.name,
                                    value_class
                                );
                                steps.push(Step::AddToProperty {
                                    name: prop.name.clone(),
                                    items: nodes,
                                });
                            }
                        }
                    } else if ty::is_map_type(&prop.ty) {
                        handled.insert(prop.name.clone());
                        if let Some(current) = struct_values.get(&prop.name) {
                            let pairs = map_entries(current);
                            if !pairs.is_empty() {
                                let mut nodes = Vec::with_capacity(pairs.len());
                                for (k, v) in &pairs {
                                    let k = self.load(k, names::OBJECT, relaxed)?;
                                    let v = self.load(v, names::OBJECT, relaxed)?;
                                    nodes.push((k, v));
                                }
                                steps.push(Step::PutToProperty {
                                    name: prop.name.clone(),
                                    entries: nodes,
                                });
                            }
                        }
                    } else if !relaxed && !relaxed_ok && ctor_sel.is_none() {
                        if spec.find_field(&prop.name).is_some() {
                            return Err(RecordError::ReadOnlyProperty {
                                class: value_class.clone(),
                                property: prop.name.clone(),
                            });
                        }
                        // no backing field: the property is derived, skip it
                    }
                    continue;
                }

                handled.insert(prop.name.clone());
                let current = struct_values.get(&prop.name).cloned().unwrap_or(RtValue::Null);
                if current.is_null() && ctor_idx.is_none() {
                    // absent properties are assumed to default to null
                    continue;
                }
                if ctor_idx.is_none() && prop.setter_ty.as_deref() != Some(prop.ty.as_str()) {
                    if relaxed {
                        let found = prop
                            .setter_overloads
                            .iter()
                            .any(|o| self.registry.assignable(o, &prop.ty));
                        if !found {
                            log::warn!(
                                "no setter overload of '{}::{}' accepts '{}'; recording with \
                                 the declared property type",
                                value_class,
                                prop.name,
                                prop.ty
                            );
                        }
                    } else {
                        return Err(RecordError::SetterTypeMismatch {
                            class: value_class.clone(),
                            property: prop.name.clone(),
                            getter_type: prop.ty.clone(),
                            setter_type: prop.setter_ty.clone().unwrap_or_default(),
                        });
                    }
                }
                let loaded = self.load(&current, &prop.ty, relaxed)?;
                match ctor_idx {
                    Some(i) => ctor_slots[i] = Some(loaded),
                    None => steps.push(Step::SetProperty { name: prop.name.clone(), value: loaded }),
                }
            }

            // accessible fields, sorted by name for determinism
            let mut fields: Vec<_> = spec.fields.iter().filter(|f| f.public).collect();
            fields.sort_by(|a, b| a.name.cmp(&b.name));
            for field in fields {
                if field.ignored || handled.contains(&field.name) {
                    continue;
                }
                let ctor_idx = name_map.remove(&field.name);
                if ctor_idx.is_none() && field.is_final {
                    continue;
                }
                let current = struct_values.get(&field.name).cloned().unwrap_or(RtValue::Null);
                let loaded = self.load(&current, &field.ty, relaxed)?;
                match ctor_idx {
                    Some(i) => ctor_slots[i] = Some(loaded),
                    None => {
                        steps.push(Step::SetField { name: field.name.clone(), value: loaded })
                    }
                }
            }
        }

        let (snap_is_list, snap_len) = match &snap {
            Snap::List { items, .. } => (true, items.len()),
            Snap::Set { items, .. } => (false, items.len()),
            Snap::Map { entries, .. } => (false, entries.len()),
            Snap::Struct { .. } => (false, 0),
        };

        // construction
        let (construct, ctor_args) = if let Some(index) = ctor_sel {
            let mut missing = Vec::new();
            let mut args = Vec::with_capacity(ctor_slots.len());
            for (i, slot) in ctor_slots.into_iter().enumerate() {
                match slot {
                    Some(d) => args.push(d),
                    None => missing.push(
                        ctor_params
                            .get(i)
                            .and_then(|p| p.name.clone())
                            .unwrap_or_else(|| format!("#{}", i)),
                    ),
                }
            }
            if !missing.is_empty() {
                return Err(RecordError::UnusedConstructorParameters {
                    class: value_class.clone(),
                    names: missing,
                });
            }
            (Construct::Ctor { class: value_class.clone(), ctor: index }, args)
        } else {
            let construct =
                self.fallback_construct(snap_is_list, snap_len, &value_class, expected, &spec)?;
            (construct, Vec::new())
        };

        node.set_creation(Creation::Object { construct, ctor_args, steps });
        Ok(node)
    }

    fn fallback_construct(
        &self,
        snap_is_list: bool,
        snap_len: usize,
        value_class: &str,
        expected: &str,
        spec: &Option<crate::object::ClassSpec>,
    ) -> Result<Construct, RecordError> {
        // a plain list expected as `list` is rebuilt as an array-list sized
        // from the source
        if expected == names::LIST && snap_is_list {
            return Ok(Construct::Container {
                class: names::ARRAY_LIST.to_string(),
                capacity: if snap_len > 0 { Some(snap_len) } else { None },
            });
        }
        // concrete container classes and registered classes with a no-arg
        // constructor construct directly
        if matches!(
            value_class,
            names::ARRAY_LIST
                | names::LINKED_HASH_SET
                | names::TREE_SET
                | names::LINKED_HASH_MAP
                | names::TREE_MAP
        ) {
            return Ok(Construct::Container { class: value_class.to_string(), capacity: None });
        }
        if let Some(spec) = spec {
            if spec.has_default_ctor() {
                return Ok(Construct::Default { class: value_class.to_string() });
            }
        }
        // last resort: a mutable stand-in chosen from the expected shape
        let class = match expected {
            names::SORTED_MAP => names::TREE_MAP,
            names::MAP => names::LINKED_HASH_MAP,
            names::LIST => names::ARRAY_LIST,
            names::SORTED_SET => names::TREE_SET,
            names::SET => names::LINKED_HASH_SET,
            _ => {
                return Err(RecordError::NoViableConstructor { class: value_class.to_string() })
            }
        };
        Ok(Construct::Container { class: class.to_string(), capacity: None })
    }

    /// The declared type for the read-back cast: the concrete class when it
    /// will be resolvable at startup, the expected type otherwise, or
    /// nothing at all.
    fn decl_class(&self, value_class: &str, expected: &str) -> Option<String> {
        if expected == names::LIST {
            return Some(names::LIST.to_string());
        }
        if self.registry.resolvable(value_class) {
            return Some(value_class.to_string());
        }
        if expected != names::OBJECT && self.registry.resolvable(expected) {
            return Some(expected.to_string());
        }
        None
    }

    /// Resolve one injected recorder-constructor parameter: a registered
    /// constant (possibly through the runtime-value wrapper), else a config
    /// value that some loader knows how to emit, else an error.
    pub fn injected_param(
        &mut self,
        class: &str,
        param_ty: &str,
        config: Option<&dyn Fn(&str) -> Option<RtValue>>,
    ) -> Result<Deferred, RecordError> {
        if let Some(constant) = self.hooks.constants.get(param_ty).cloned() {
            return self.load(&constant, param_ty, false);
        }
        if let Some(inner_ty) = ty::runtime_value_inner(param_ty) {
            let inner_ty = inner_ty.to_string();
            if let Some(constant) = self.hooks.constants.get(&inner_ty).cloned() {
                let node = self.load(&constant, &inner_ty, false)?;
                return Ok(stored(
                    Some(names::RUNTIME_VALUE.to_string()),
                    Creation::RuntimeValueWrap(node),
                ));
            }
        }
        if let Some(config) = config {
            if let Some(value) = config(param_ty) {
                let wrapped_inner = value.as_ref().and_then(|r| match &*r.get() {
                    HeapObj::RuntimeValue(inner) => Some(inner.clone()),
                    _ => None,
                });
                if let Some(inner) = wrapped_inner {
                    if self.static_init {
                        // the wrapped object does not exist yet during
                        // static init; an empty holder is injected instead
                        return Ok(stored(
                            Some(names::RUNTIME_VALUE.to_string()),
                            Creation::RuntimeValueEmpty,
                        ));
                    }
                    let node = self.find_loaded(&inner).ok_or_else(|| {
                        RecordError::NoInjectableValue {
                            class: class.to_string(),
                            param_type: param_ty.to_string(),
                        }
                    })?;
                    return Ok(stored(
                        Some(names::RUNTIME_VALUE.to_string()),
                        Creation::RuntimeValueWrap(node),
                    ));
                }
                return self.find_loaded(&value).ok_or_else(|| RecordError::NoInjectableValue {
                    class: class.to_string(),
                    param_type: param_ty.to_string(),
                });
            }
        }
        Err(RecordError::NoInjectableValue {
            class: class.to_string(),
            param_type: param_ty.to_string(),
        })
    }

    /// Build the loader-backed node used for injected recorder-constructor
    /// values; no deduplication applies.
    pub fn find_loaded(&self, value: &RtValue) -> Option<Deferred> {
        let loader = self.hooks.find_loader(value, self.static_init)?;
        let decl = self.decl_class(&value.runtime_class(), names::OBJECT);
        Some(stored(
            decl,
            Creation::Loader { loader, value: value.clone(), static_init: self.static_init },
        ))
    }
}

fn collection_items(value: &RtValue) -> Vec<RtValue> {
    match value.as_ref() {
        Some(r) => match &*r.get() {
            HeapObj::List { items, .. } | HeapObj::Set { items, .. } => items.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

fn map_entries(value: &RtValue) -> Vec<(RtValue, RtValue)> {
    match value.as_ref() {
        Some(r) => match &*r.get() {
            HeapObj::Map { entries, .. } => entries.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

fn singleton_element(items: &[RtValue], class: &str) -> Result<RtValue, RecordError> {
    if items.len() != 1 {
        return Err(RecordError::UnsupportedValue {
            detail: format!("{} with {} elements", class, items.len()),
        });
    }
    Ok(items[0].clone())
}
