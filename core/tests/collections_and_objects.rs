use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use encore_core::{
    BytecodeRecorder, ClassSpec, HeapObj, ObjRef, RecordError, RecordedTask, RtValue, RuntimeEnv,
    StartupContext, StartupRecorder, StartupTask, TypeRegistry,
};

struct CapturingRecorder {
    calls: Rc<RefCell<Vec<Vec<RtValue>>>>,
}

impl StartupRecorder for CapturingRecorder {
    fn dispatch(&mut self, _method: &str, args: Vec<RtValue>) -> Result<RtValue, String> {
        self.calls.borrow_mut().push(args);
        Ok(RtValue::Null)
    }
}

fn base_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(
        ClassSpec::new("demo.ObjectRecorder")
            .method("accept", &["object"], "void")
            .method("set_values", &["list"], "void")
            .method("set_lookup", &["map"], "void")
            .method("configure", &["demo.Person"], "void")
            .method("hold", &["demo.Holder"], "void")
            .relaxed_method("apply_relaxed", &[("demo.Widget", true)], "void")
            .method("apply", &["demo.Widget"], "void"),
    );
    registry.register(
        ClassSpec::new("demo.Person")
            .ctor(&[("name", "string"), ("age", "int")])
            .field("name", "string")
            .field("age", "int"),
    );
    registry
}

fn replay(recorder: &BytecodeRecorder, runtime_registry: TypeRegistry) -> Vec<Vec<RtValue>> {
    let program = recorder.finish().expect("finish");
    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new(runtime_registry);
    env.register_recorder("demo.ObjectRecorder", move |_| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");
    let observed = observed.borrow().clone();
    observed
}

#[test]
fn list_arguments_replay_in_order() {
    let registry = base_registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Lists", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let list = RtValue::list(vec![RtValue::str("x"), RtValue::str("y")]);
    proxy.invoke("set_values", vec![list.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], list);
}

#[test]
fn maps_and_sets_replay_with_their_contents() {
    let registry = base_registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Maps", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");

    let map = RtValue::map(vec![
        (RtValue::str("a"), RtValue::int(1)),
        (RtValue::str("b"), RtValue::int(2)),
    ]);
    let sorted = RtValue::sorted_map(vec![
        (RtValue::str("x"), RtValue::int(1)),
        (RtValue::str("y"), RtValue::int(2)),
    ]);
    let set = RtValue::set(vec![RtValue::str("p"), RtValue::str("q")]);
    proxy.invoke("set_lookup", vec![map.clone()]).expect("record");
    proxy.invoke("accept", vec![sorted.clone()]).expect("record");
    proxy.invoke("accept", vec![set.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], map);
    assert_eq!(observed[1][0], sorted);
    assert_eq!(observed[2][0], set);
}

#[test]
fn factory_family_values_keep_their_identity_classes() {
    let registry = base_registry();
    let recorder =
        BytecodeRecorder::for_class_name(false, "demo.Factories", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");

    let values = vec![
        RtValue::empty_list(),
        RtValue::empty_set(),
        RtValue::empty_sorted_set(),
        RtValue::empty_map(),
        RtValue::empty_sorted_map(),
        RtValue::singleton_list(RtValue::str("e")),
        RtValue::singleton_set(RtValue::int(3)),
        RtValue::singleton_map(RtValue::str("k"), RtValue::str("v")),
    ];
    for v in &values {
        proxy.invoke("accept", vec![v.clone()]).expect("record");
    }

    let observed = replay(&recorder, registry);
    for (seen, expected) in observed.iter().zip(&values) {
        assert_eq!(&seen[0], expected);
        assert_eq!(seen[0].runtime_class(), expected.runtime_class());
    }
}

#[test]
fn constructor_injected_value_object_replays_by_field() {
    let registry = base_registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Person1", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let person =
        RtValue::struct_obj("demo.Person", [("name", RtValue::str("A")), ("age", RtValue::int(3))]);
    proxy.invoke("configure", vec![person.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], person);
}

#[test]
fn bean_style_objects_replay_through_setters() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Config").property("host", "string").property("port", "int"),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Beans", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let config = RtValue::struct_obj(
        "demo.Config",
        [("host", RtValue::str("localhost")), ("port", RtValue::int(8080))],
    );
    proxy.invoke("accept", vec![config.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], config);
}

#[test]
fn read_only_collection_property_is_populated_in_place() {
    let mut registry = base_registry();
    registry.register(ClassSpec::new("demo.Holder").read_only_property("tags", "list"));
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Holder1", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let holder = RtValue::struct_obj(
        "demo.Holder",
        [("tags", RtValue::list(vec![RtValue::str("a"), RtValue::str("b")]))],
    );
    proxy.invoke("hold", vec![holder.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], holder);
}

#[test]
fn read_only_property_with_backing_field_is_a_strict_mode_error() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Widget")
            .read_only_property("secret", "string")
            .private_field("secret", "string"),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Leaky", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let widget = RtValue::struct_obj("demo.Widget", [("secret", RtValue::str("s"))]);

    proxy.invoke("apply", vec![widget.clone()]).expect("record");
    let err = recorder.finish().expect_err("strict mode must fail");
    assert!(err.to_string().contains("secret"), "got {}", err);

    // the relaxed parameter skips the property instead
    let relaxed = BytecodeRecorder::for_class_name(false, "demo.Leaky2", Rc::new(registry.clone()));
    let proxy = relaxed.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    proxy.invoke("apply_relaxed", vec![widget]).expect("record");
    let observed = replay(&relaxed, registry);
    match observed[0][0].as_ref().map(|r| r.get().class_name()) {
        Some(class) => assert_eq!(class, "demo.Widget"),
        None => panic!("expected a heap object"),
    }
}

#[test]
fn mismatched_setter_types_fail_unless_relaxed() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Widget")
            .mismatched_property("mode", "string", "int")
            .setter_overloads(&["string"]),
    );
    let widget = RtValue::struct_obj("demo.Widget", [("mode", RtValue::str("fast"))]);

    let strict = BytecodeRecorder::for_class_name(false, "demo.Strict", Rc::new(registry.clone()));
    let proxy = strict.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    proxy.invoke("apply", vec![widget.clone()]).expect("record");
    let err = strict.finish().expect_err("strict mode must fail");
    assert!(
        matches!(&err, RecordError::RecordCall { source, .. }
            if matches!(**source, RecordError::SetterTypeMismatch { .. })),
        "got {}",
        err
    );

    let relaxed = BytecodeRecorder::for_class_name(false, "demo.Relaxed", Rc::new(registry.clone()));
    let proxy = relaxed.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    proxy.invoke("apply_relaxed", vec![widget.clone()]).expect("record");
    let observed = replay(&relaxed, registry);
    assert_eq!(observed[0][0], widget);
}

#[test]
fn widest_constructor_is_used_for_marked_classes() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Span")
            .ctor(&[("lo", "int")])
            .ctor(&[("lo", "int"), ("hi", "int")])
            .field("lo", "int")
            .field("hi", "int"),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Span1", Rc::new(registry.clone()));
    recorder.mark_class_as_constructor_recordable("demo.Span");
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let span =
        RtValue::struct_obj("demo.Span", [("lo", RtValue::int(1)), ("hi", RtValue::int(9))]);
    proxy.invoke("accept", vec![span.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], span);
}

#[test]
fn equally_wide_constructors_are_ambiguous() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Twin")
            .ctor(&[("a", "int"), ("b", "int")])
            .ctor(&[("x", "int"), ("y", "int")])
            .field("a", "int")
            .field("b", "int"),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Twin1", Rc::new(registry));
    recorder.mark_class_as_constructor_recordable("demo.Twin");
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let twin = RtValue::struct_obj("demo.Twin", [("a", RtValue::int(1)), ("b", RtValue::int(2))]);
    proxy.invoke("accept", vec![twin]).expect("record");
    let err = recorder.finish().expect_err("must be ambiguous");
    assert!(
        matches!(&err, RecordError::RecordCall { source, .. }
            if matches!(**source, RecordError::AmbiguousConstructor { .. })),
        "got {}",
        err
    );
}

#[test]
fn registered_non_default_constructor_drives_construction() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Range").ctor(&[("lo", "int"), ("hi", "int")]),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Range1", Rc::new(registry.clone()));
    recorder.register_non_default_constructor("demo.Range", 0, |value| {
        let r = value.as_ref().expect("range is a heap object");
        match &*r.get() {
            HeapObj::Struct { values, .. } => vec![
                values.get("lo").cloned().unwrap_or(RtValue::Null),
                values.get("hi").cloned().unwrap_or(RtValue::Null),
            ],
            other => panic!("unexpected {:?}", other),
        }
    });
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let range =
        RtValue::struct_obj("demo.Range", [("lo", RtValue::int(1)), ("hi", RtValue::int(9))]);
    proxy.invoke("accept", vec![range.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], range);
}

#[test]
fn unmatched_constructor_parameters_are_an_error() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Pair").ctor(&[("a", "int"), ("b", "int")]).field("a", "int"),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Pair1", Rc::new(registry));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let pair = RtValue::struct_obj("demo.Pair", [("a", RtValue::int(1))]);
    proxy.invoke("accept", vec![pair]).expect("record");
    let err = recorder.finish().expect_err("parameter b has no source");
    assert!(err.to_string().contains('b'), "got {}", err);
}

#[test]
fn sorted_map_with_custom_comparator_is_rejected() {
    let registry = base_registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Cmp", Rc::new(registry));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let map = RtValue::Ref(ObjRef::new(HeapObj::Map {
        class: "tree-map".to_string(),
        entries: vec![(RtValue::str("k"), RtValue::int(1))],
        custom_comparator: true,
    }));
    proxy.invoke("set_lookup", vec![map]).expect("record");
    let err = recorder.finish().expect_err("comparator cannot be recorded");
    assert!(
        matches!(&err, RecordError::RecordCall { source, .. }
            if matches!(**source, RecordError::CustomComparator { .. })),
        "got {}",
        err
    );
}

#[test]
fn annotation_values_fill_defaults_by_member_name() {
    let mut registry = base_registry();
    registry.register(
        ClassSpec::new("demo.Route")
            .annotation_member("path", "string", None)
            .annotation_member("priority", "int", Some(RtValue::int(0))),
    );
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Ann", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");

    let mut values = BTreeMap::new();
    values.insert("path".to_string(), RtValue::str("/x"));
    let route = RtValue::Ref(ObjRef::new(HeapObj::Annotation {
        class: "demo.Route".to_string(),
        values,
    }));
    proxy.invoke("accept", vec![route]).expect("record");

    let observed = replay(&recorder, registry);
    let mut expected_values = BTreeMap::new();
    expected_values.insert("path".to_string(), RtValue::str("/x"));
    expected_values.insert("priority".to_string(), RtValue::int(0));
    let expected = RtValue::Ref(ObjRef::new(HeapObj::Annotation {
        class: "demo.Route".to_string(),
        values: expected_values,
    }));
    assert_eq!(observed[0][0], expected);
}

#[test]
fn arrays_replay_slot_by_slot() {
    let registry = base_registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Arr", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.ObjectRecorder").expect("proxy");
    let array = RtValue::array(
        "string",
        vec![RtValue::str("a"), RtValue::Null, RtValue::str("c")],
    );
    proxy.invoke("accept", vec![array.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    assert_eq!(observed[0][0], array);
}
