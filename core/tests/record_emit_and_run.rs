use std::cell::RefCell;
use std::rc::Rc;

use encore_core::{
    BytecodeRecorder, ClassSpec, InMemoryClassOutput, RecordedTask, RtValue, RuntimeEnv,
    StartupContext, StartupRecorder, StartupTask, TypeRegistry,
};

struct CapturingRecorder {
    calls: Rc<RefCell<Vec<(String, Vec<RtValue>)>>>,
}

impl StartupRecorder for CapturingRecorder {
    fn dispatch(&mut self, method: &str, args: Vec<RtValue>) -> Result<RtValue, String> {
        self.calls.borrow_mut().push((method.to_string(), args));
        Ok(RtValue::Null)
    }
}

fn registry() -> Rc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register(
        ClassSpec::new("demo.GreetRecorder")
            .method("greet", &["string", "int"], "void")
            .method("note", &["int"], "void"),
    );
    Rc::new(registry)
}

#[test]
fn records_and_replays_literal_arguments() {
    let registry = registry();
    let recorder = BytecodeRecorder::new(false, "demo.GreetStep", "setup", "0f3a", registry.clone());
    assert_eq!(recorder.class_name(), "encore.recorded.demo.GreetStep$setup0f3a");
    assert!(recorder.is_empty());

    let proxy = recorder.get_recording_proxy("demo.GreetRecorder").expect("proxy");
    proxy
        .invoke("greet", vec![RtValue::str("hi"), RtValue::int(7)])
        .expect("record greet");
    assert!(!recorder.is_empty());

    let mut output = InMemoryClassOutput::new();
    recorder.write_bytecode(&mut output).expect("emit");
    assert_eq!(output.classes.len(), 1);
    let (name, bytes) = &output.classes[0];
    assert_eq!(name, recorder.class_name());

    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_recorder("demo.GreetRecorder", move |_args| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });

    let task = RecordedTask::from_bytes(bytes, Rc::new(env)).expect("parse");
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");

    assert_eq!(ctx.current_build_step_name(), Some("demo.GreetStep.setup"));
    let observed = observed.borrow();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].0, "greet");
    assert_eq!(observed[0].1, vec![RtValue::str("hi"), RtValue::int(7)]);
}

#[test]
fn calls_replay_in_interception_order() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Ordered", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.GreetRecorder").expect("proxy");
    for i in 0..25 {
        proxy.invoke("note", vec![RtValue::int(i)]).expect("record");
    }

    let program = recorder.finish().expect("finish");

    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_recorder("demo.GreetRecorder", move |_args| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");

    let observed = observed.borrow();
    assert_eq!(observed.len(), 25);
    for (i, (method, args)) in observed.iter().enumerate() {
        assert_eq!(method, "note");
        assert_eq!(args, &vec![RtValue::int(i as i64)]);
    }
}

#[test]
fn to_string_is_answered_locally_and_never_recorded() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.ToString", registry);
    let proxy = recorder.get_recording_proxy("demo.GreetRecorder").expect("proxy");
    let repr = proxy.invoke("to_string", vec![]).expect("to_string");
    match repr {
        RtValue::Str(s) => assert!(s.contains("RecordingProxy"), "got {}", s),
        other => panic!("expected a string, got {:?}", other),
    }
    assert!(recorder.is_empty());
}

#[test]
fn repeated_proxy_requests_return_the_same_proxy() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.SameProxy", registry);
    let a = recorder.get_recording_proxy("demo.GreetRecorder").expect("proxy");
    let b = recorder.get_recording_proxy("demo.GreetRecorder").expect("proxy");
    a.invoke("note", vec![RtValue::int(1)]).expect("record");
    b.invoke("note", vec![RtValue::int(2)]).expect("record");
    // both handles feed the same recorded history
    let program = recorder.finish().expect("finish");
    let invokes = program
        .procs
        .iter()
        .flat_map(|p| p.ops.iter())
        .filter(|op| matches!(op, encore_core::ir::Op::Invoke { .. }))
        .count();
    assert_eq!(invokes, 2);
}
