use std::cell::RefCell;
use std::rc::Rc;

use encore_core::{
    BytecodeRecorder, ClassSpec, RecordError, RecordedTask, RtValue, RuntimeEnv, StartupContext,
    StartupRecorder, StartupTask, TypeRegistry,
};

struct HandleRecorder {
    produced: Rc<RefCell<Option<RtValue>>>,
    used: Rc<RefCell<Vec<RtValue>>>,
}

impl StartupRecorder for HandleRecorder {
    fn dispatch(&mut self, method: &str, mut args: Vec<RtValue>) -> Result<RtValue, String> {
        match method {
            "create" => {
                let value = RtValue::runtime_value(RtValue::str("payload"));
                *self.produced.borrow_mut() = Some(value.clone());
                Ok(value)
            }
            "use_handle" => {
                self.used.borrow_mut().push(args.remove(0));
                Ok(RtValue::Null)
            }
            other => Err(format!("unexpected method {}", other)),
        }
    }
}

fn registry() -> Rc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register(
        ClassSpec::new("demo.HandleRecorder")
            .method("create", &[], "runtime-value")
            .method("use_handle", &["runtime-value"], "void")
            .method("bad", &[], "string"),
    );
    registry.register(ClassSpec::new("demo.Widget"));
    registry.register(ClassSpec::new("demo.Sealed").final_class());
    Rc::new(registry)
}

#[test]
fn returned_handle_resolves_to_the_same_object() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Handles", registry.clone());
    let proxy = recorder.get_recording_proxy("demo.HandleRecorder").expect("proxy");

    let handle = proxy.invoke("create", vec![]).expect("create");
    assert!(matches!(handle, RtValue::Proxy(_)));
    proxy.invoke("use_handle", vec![handle]).expect("use");

    let program = recorder.finish().expect("finish");

    let produced = Rc::new(RefCell::new(None));
    let used = Rc::new(RefCell::new(Vec::new()));
    let (produced_out, used_out) = (produced.clone(), used.clone());
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_recorder("demo.HandleRecorder", move |_| {
        Ok(Box::new(HandleRecorder { produced: produced.clone(), used: used.clone() })
            as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");

    let produced = produced_out.borrow();
    let used = used_out.borrow();
    let produced_ref = produced.as_ref().and_then(|v| v.as_ref()).expect("produced a value");
    assert_eq!(used.len(), 1);
    let used_ref = used[0].as_ref().expect("used a heap value");
    assert!(produced_ref.same(used_ref), "use_handle must see the exact object create produced");
}

#[test]
fn new_instance_publishes_a_runtime_value() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.NewInstance", registry.clone());
    let handle = recorder.new_instance("demo.Widget");
    let proxy = recorder.get_recording_proxy("demo.HandleRecorder").expect("proxy");
    proxy.invoke("use_handle", vec![handle]).expect("use");

    let program = recorder.finish().expect("finish");

    let used = Rc::new(RefCell::new(Vec::new()));
    let used_out = used.clone();
    let mut env = RuntimeEnv::new((*registry).clone());
    env.register_recorder("demo.HandleRecorder", move |_| {
        Ok(Box::new(HandleRecorder { produced: Rc::new(RefCell::new(None)), used: used.clone() })
            as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");

    let used = used_out.borrow();
    assert_eq!(used.len(), 1);
    let wrapped = used[0].as_ref().expect("heap value");
    match &*wrapped.get() {
        encore_core::HeapObj::RuntimeValue(inner) => {
            assert_eq!(inner.runtime_class(), "demo.Widget");
        }
        other => panic!("expected a runtime-value, got {:?}", other),
    };
}

#[test]
fn runtime_proxy_is_rejected_by_static_init_recorder() {
    let registry = registry();
    let runtime_recorder =
        BytecodeRecorder::for_class_name(false, "demo.RuntimePhase", registry.clone());
    let runtime_proxy =
        runtime_recorder.get_recording_proxy("demo.HandleRecorder").expect("proxy");
    let handle = runtime_proxy.invoke("create", vec![]).expect("create");

    let static_recorder =
        BytecodeRecorder::for_class_name(true, "demo.StaticPhase", registry.clone());
    let static_proxy = static_recorder.get_recording_proxy("demo.HandleRecorder").expect("proxy");
    let err = static_proxy.invoke("use_handle", vec![handle]).expect_err("must reject");
    assert!(matches!(err, RecordError::CrossPhaseProxy { .. }), "got {}", err);

    // the opposite direction is fine: static-init handles may be consumed
    // by runtime recorders
    let static_handle = static_proxy.invoke("create", vec![]).expect("create");
    runtime_proxy.invoke("use_handle", vec![static_handle]).expect("static handle is usable");
}

#[test]
fn arbitrary_dispatch_on_a_returned_proxy_fails() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Direct", registry);
    let proxy = recorder.get_recording_proxy("demo.HandleRecorder").expect("proxy");
    let handle = match proxy.invoke("create", vec![]).expect("create") {
        RtValue::Proxy(h) => h,
        other => panic!("expected a proxy, got {:?}", other),
    };

    assert!(matches!(handle.dispatch("key", &[]), Ok(RtValue::Str(_))));
    assert!(matches!(handle.dispatch("is_static_init", &[]), Ok(RtValue::Bool(false))));
    assert!(matches!(handle.dispatch("to_string", &[]), Ok(RtValue::Str(_))));
    let same = handle
        .dispatch("equals", &[RtValue::Proxy(handle.clone())])
        .expect("equals");
    assert_eq!(same, RtValue::Bool(true));

    let err = handle.dispatch("fetch_now", &[]).expect_err("must fail");
    assert!(matches!(err, RecordError::DirectProxyCall { .. }), "got {}", err);
}

#[test]
fn unproxiable_return_types_are_rejected() {
    let mut registry = TypeRegistry::new();
    registry.register(
        ClassSpec::new("demo.BadRecorder")
            .method("bad_string", &[], "string")
            .method("bad_final", &[], "demo.Sealed")
            .method("bad_no_ctor", &[], "demo.NeedsArgs"),
    );
    registry.register(ClassSpec::new("demo.Sealed").final_class());
    registry.register(ClassSpec::new("demo.NeedsArgs").ctor(&[("value", "int")]));
    let registry = Rc::new(registry);

    let recorder = BytecodeRecorder::for_class_name(false, "demo.Bad", registry);
    let proxy = recorder.get_recording_proxy("demo.BadRecorder").expect("proxy");
    for method in ["bad_string", "bad_final", "bad_no_ctor"] {
        let err = proxy.invoke(method, vec![]).expect_err("must fail");
        assert!(matches!(err, RecordError::UnrecordableReturn { .. }), "{}: {}", method, err);
    }
}
