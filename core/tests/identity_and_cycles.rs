use std::cell::RefCell;
use std::rc::Rc;

use encore_core::{
    BytecodeRecorder, ClassSpec, HeapObj, RecordedTask, RtValue, RuntimeEnv, StartupContext,
    StartupRecorder, StartupTask, TypeRegistry,
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
    registry.register(
        ClassSpec::new("demo.GraphRecorder")
            .method("store", &["map"], "void")
            .method("pair", &["list", "list"], "void")
            .method("accept", &["object"], "void"),
    );
    registry
}

fn replay(recorder: &BytecodeRecorder, runtime_registry: TypeRegistry) -> Vec<Vec<RtValue>> {
    let program = recorder.finish().expect("finish");
    let calls = Rc::new(RefCell::new(Vec::new()));
    let observed = calls.clone();
    let mut env = RuntimeEnv::new(runtime_registry);
    env.register_recorder("demo.GraphRecorder", move |_| {
        Ok(Box::new(CapturingRecorder { calls: calls.clone() }) as Box<dyn StartupRecorder>)
    });
    let task = RecordedTask::new(program, Rc::new(env));
    let mut ctx = StartupContext::new();
    task.deploy(&mut ctx).expect("deploy");
    let observed = observed.borrow().clone();
    observed
}

#[test]
fn shared_arguments_replay_as_one_object() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Shared", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.GraphRecorder").expect("proxy");

    let shared = RtValue::list(vec![RtValue::str("s")]);
    proxy.invoke("pair", vec![shared.clone(), shared.clone()]).expect("record");

    let observed = replay(&recorder, registry);
    let first = observed[0][0].as_ref().expect("heap value");
    let second = observed[0][1].as_ref().expect("heap value");
    assert!(first.same(second), "identity-shared arguments must replay as one object");
}

#[test]
fn distinct_but_equal_arguments_stay_distinct_under_identity_comparison() {
    let registry = registry();
    let recorder =
        BytecodeRecorder::for_class_name(false, "demo.Distinct", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.GraphRecorder").expect("proxy");

    let a = RtValue::list(vec![RtValue::str("s")]);
    let b = RtValue::list(vec![RtValue::str("s")]);
    proxy.invoke("pair", vec![a, b]).expect("record");

    let observed = replay(&recorder, registry);
    let first = observed[0][0].as_ref().expect("heap value");
    let second = observed[0][1].as_ref().expect("heap value");
    assert!(!first.same(second));
    assert_eq!(observed[0][0], observed[0][1]);
}

#[test]
fn value_comparison_mode_merges_equal_arguments() {
    let registry = registry();
    let mut recorder =
        BytecodeRecorder::for_class_name(false, "demo.Merged", Rc::new(registry.clone()));
    recorder.set_use_identity_comparison(false);
    let proxy = recorder.get_recording_proxy("demo.GraphRecorder").expect("proxy");

    let a = RtValue::list(vec![RtValue::str("s")]);
    let b = RtValue::list(vec![RtValue::str("s")]);
    proxy.invoke("pair", vec![a, b]).expect("record");

    let observed = replay(&recorder, registry);
    let first = observed[0][0].as_ref().expect("heap value");
    let second = observed[0][1].as_ref().expect("heap value");
    assert!(first.same(second), "value comparison deduplicates equal arguments");
}

#[test]
fn self_referential_map_preserves_identity() {
    let registry = registry();
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Cycle", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.GraphRecorder").expect("proxy");

    let map = RtValue::map(vec![]);
    {
        let r = map.as_ref().expect("map is a heap object");
        match &mut *r.get_mut() {
            HeapObj::Map { entries, .. } => {
                entries.push((RtValue::str("self"), map.clone()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    proxy.invoke("store", vec![map]).expect("record");

    let observed = replay(&recorder, registry);
    let outer = observed[0][0].as_ref().expect("heap value");
    match &*outer.get() {
        HeapObj::Map { entries, .. } => {
            assert_eq!(entries.len(), 1);
            match &entries[0] {
                (RtValue::Str(key), RtValue::Ref(inner)) => {
                    assert_eq!(key, "self");
                    assert!(outer.same(inner), "the cycle must point back at the same map");
                }
                other => panic!("unexpected entry {:?}", other),
            }
        }
        other => panic!("expected a map, got {:?}", other),
    };
}

#[test]
fn mutual_references_between_objects_are_preserved() {
    let mut registry = registry();
    registry.register(ClassSpec::new("demo.Node").property("next", "object"));
    let recorder = BytecodeRecorder::for_class_name(false, "demo.Mutual", Rc::new(registry.clone()));
    let proxy = recorder.get_recording_proxy("demo.GraphRecorder").expect("proxy");

    let a = RtValue::struct_obj("demo.Node", []);
    let b = RtValue::struct_obj("demo.Node", [("next", a.clone())]);
    {
        let r = a.as_ref().expect("heap");
        match &mut *r.get_mut() {
            HeapObj::Struct { values, .. } => {
                values.insert("next".to_string(), b.clone());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    proxy.invoke("accept", vec![a]).expect("record");

    let observed = replay(&recorder, registry);
    let replayed_a = observed[0][0].as_ref().expect("heap value");
    let replayed_b = match &*replayed_a.get() {
        HeapObj::Struct { values, .. } => {
            values.get("next").and_then(|v| v.as_ref()).cloned().expect("a.next")
        }
        other => panic!("expected a node, got {:?}", other),
    };
    match &*replayed_b.get() {
        HeapObj::Struct { values, .. } => {
            let back = values.get("next").and_then(|v| v.as_ref()).cloned().expect("b.next");
            assert!(back.same(replayed_a), "b.next must point back at a");
        }
        other => panic!("expected a node, got {:?}", other),
    };
}
