use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use encore_core::{
    BytecodeRecorder, ClassSpec, ObjectSubstitution, RecordedTask, RtType, RtValue, RuntimeEnv,
    StartupContext, StartupRecorder, StartupTask, TypeRegistry, WildcardBound,
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

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(ClassSpec::new("demo.ValueRecorder").method("accept", &["object"], "void"));
    registry.register(ClassSpec::new("demo.Color").variants(&["RED", "GREEN", "BLUE"]));
    registry
}

fn replay(recorder: &BytecodeRecorder, runtime_registry: TypeRegistry) -> Vec<Vec<RtValue>> {
    let program = recorder.finish().expect("finish");
    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new(runtime_registry);
    env.register_recorder("demo.ValueRecorder", move |_| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");
    let observed = observed.borrow().clone();
    observed
}

#[test]
fn scalars_strings_and_temporal_values_round_trip() {
    let registry = Rc::new(registry());
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Scalars", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.ValueRecorder").expect("proxy");

    let values = vec![
        RtValue::Bool(true),
        RtValue::Int(-42),
        RtValue::Float(2.75),
        RtValue::Char('ß'),
        RtValue::str("hello"),
        RtValue::Duration(Duration::new(5, 123)),
        RtValue::Duration(Duration::from_secs(90)),
        RtValue::Url(url::Url::parse("https://a/b?q=1").expect("url")),
        RtValue::Enum { class: "demo.Color".to_string(), variant: "GREEN".to_string() },
        RtValue::Optional(Some(Box::new(RtValue::str("inner")))),
        RtValue::Optional(None),
        RtValue::Null,
    ];
    for v in &values {
        proxy.invoke("accept", vec![v.clone()]).expect("record");
    }

    let observed = replay(&recorder, (*registry).clone());
    assert_eq!(observed.len(), values.len());
    for (seen, expected) in observed.iter().zip(&values) {
        assert_eq!(&seen[0], expected);
    }
}

#[test]
fn class_references_and_reflective_types_round_trip() {
    let registry = Rc::new(registry());
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Types", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.ValueRecorder").expect("proxy");

    // a class that only exists at startup is recorded through a stand-in
    let stand_in = recorder.class_proxy("demo.LateLoaded");
    match &stand_in {
        RtValue::Class(name) => assert_ne!(name, "demo.LateLoaded"),
        other => panic!("expected a class reference, got {:?}", other),
    }
    // primitives need no stand-in
    assert_eq!(recorder.class_proxy("int"), RtValue::Class("int".to_string()));

    let parameterized = RtValue::Type(RtType::Parameterized {
        raw: Box::new(RtType::Class("list".to_string())),
        args: vec![
            RtType::Class("demo.Color".to_string()),
            RtType::Wildcard(WildcardBound::Upper(Box::new(RtType::Class(
                "demo.Color".to_string(),
            )))),
        ],
        owner: None,
    });
    let generic_array =
        RtValue::Type(RtType::GenericArray(Box::new(RtType::Class("string".to_string()))));
    let unbounded = RtValue::Type(RtType::Wildcard(WildcardBound::Unbounded));

    proxy.invoke("accept", vec![RtValue::Class("demo.Color".to_string())]).expect("record");
    proxy.invoke("accept", vec![stand_in]).expect("record");
    proxy.invoke("accept", vec![parameterized.clone()]).expect("record");
    proxy.invoke("accept", vec![generic_array.clone()]).expect("record");
    proxy.invoke("accept", vec![unbounded.clone()]).expect("record");

    // the startup registry knows the late-loaded class
    let mut runtime_registry = (*registry).clone();
    runtime_registry.register(ClassSpec::new("demo.LateLoaded"));

    let observed = replay(&recorder, runtime_registry);
    assert_eq!(observed[0][0], RtValue::Class("demo.Color".to_string()));
    // the stand-in is resolved back to the original name
    assert_eq!(observed[1][0], RtValue::Class("demo.LateLoaded".to_string()));
    assert_eq!(observed[2][0], parameterized);
    assert_eq!(observed[3][0], generic_array);
    assert_eq!(observed[4][0], unbounded);
}

#[test]
fn unknown_enum_variants_fail_at_startup() {
    let registry = Rc::new(registry());
    let recorder = BytecodeRecorder::for_class_name(false, "demo.BadEnum", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.ValueRecorder").expect("proxy");
    proxy
        .invoke(
            "accept",
            vec![RtValue::Enum { class: "demo.Color".to_string(), variant: "MAUVE".to_string() }],
        )
        .expect("record");

    let program = recorder.finish().expect("finish");
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_recorder("demo.ValueRecorder", move |_| {
        Ok(Box::new(CapturingRecorder { calls: Rc::new(RefCell::new(Vec::new())) })
            as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    let err = task.deploy(&mut ctx).expect_err("must fail");
    assert!(err.contains("MAUVE"), "got {}", err);
}

struct UrlAsString;

impl ObjectSubstitution for UrlAsString {
    fn serialize(&self, value: &RtValue) -> Result<RtValue, String> {
        match value {
            RtValue::Url(u) => Ok(RtValue::Str(u.as_str().to_string())),
            other => Err(format!("not a url: {:?}", other)),
        }
    }

    fn deserialize(&self, value: RtValue) -> Result<RtValue, String> {
        match value {
            RtValue::Str(s) => {
                Ok(RtValue::Url(url::Url::parse(&s).map_err(|e| e.to_string())?))
            }
            other => Err(format!("not a string: {:?}", other)),
        }
    }
}

#[test]
fn registered_substitution_round_trips() {
    let registry = Rc::new(registry());
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Subst", registry.clone());
    recorder.register_substitution("url", "string", "demo.UrlAsString", Box::new(UrlAsString));
    let proxy = recorder.get_recording_proxy("demo.ValueRecorder").expect("proxy");

    let original = RtValue::Url(url::Url::parse("https://a/b").expect("url"));
    proxy.invoke("accept", vec![original.clone()]).expect("record");

    let program = recorder.finish().expect("finish");
    // the substitution shows up as a deserialize instruction
    let has_deserialize = program
        .procs
        .iter()
        .flat_map(|p| p.ops.iter())
        .any(|op| matches!(op, encore_core::ir::Op::Deserialize { .. }));
    assert!(has_deserialize);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_substitution("demo.UrlAsString", Box::new(UrlAsString));
    env.register_recorder("demo.ValueRecorder", move |_| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");

    let observed = observed.borrow();
    assert_eq!(observed[0][0], original);
}

#[test]
fn json_marshalled_arguments_round_trip() {
    let json = serde_json::json!({
        "name": "svc",
        "ports": [1, 2],
        "active": true,
        "fallback": null
    });
    let value = RtValue::from_json(&json);

    let registry = Rc::new(registry());
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Json", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.ValueRecorder").expect("proxy");
    proxy.invoke("accept", vec![value.clone()]).expect("record");

    let observed = replay(&recorder, (*registry).clone());
    assert_eq!(observed[0][0], value);
    assert_eq!(observed[0][0].to_json(), json);
}

#[test]
fn oversized_strings_are_rejected_at_the_boundary() {
    let registry = Rc::new(registry());

    let ok = BytecodeRecorder::for_class_name(false, "demo.StrOk", registry.clone());
    let proxy = ok.get_recording_proxy("demo.ValueRecorder").expect("proxy");
    proxy.invoke("accept", vec![RtValue::Str("x".repeat(65535))]).expect("record");
    ok.finish().expect("65535 bytes fit");

    let too_big = BytecodeRecorder::for_class_name(false, "demo.StrBig", registry.clone());
    let proxy = too_big.get_recording_proxy("demo.ValueRecorder").expect("proxy");
    proxy.invoke("accept", vec![RtValue::Str("x".repeat(65536))]).expect("record");
    let err = too_big.finish().expect_err("65536 bytes must not fit");
    assert!(err.to_string().contains("65536"), "got {}", err);
}
