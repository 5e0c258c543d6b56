//! End-to-end checks of the bridge against the mock engine.
//!
//! Each test builds its own mock world, so the counters in `MockStats` only
//! see what that test did.

use std::sync::Barrier;

use enginebridge::prelude::*;
use enginebridge_core::abi::proc_names;
use enginebridge_mock::{MockCall, MockEngine};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn setup() -> (MockEngine, Engine, Registry) {
    init_tracing();
    let mock = MockEngine::new();
    let engine = Engine::new(mock.clone());
    let registry = Registry::new(engine.clone());
    (mock, engine, registry)
}

// =============================================================================
// Ownership
// =============================================================================

#[test]
fn adopted_value_is_released_exactly_once() {
    let (mock, _engine, registry) = setup();

    let dropped = registry.adopt::<NativeString>(mock.new_string("a")).unwrap();
    drop(dropped);
    let released = registry.adopt::<NativeString>(mock.new_string("b")).unwrap();
    released.release();
    let ended = registry.adopt::<NativeString>(mock.new_string("c")).unwrap();
    let raw = ended.end().unwrap();

    let stats = mock.stats();
    assert_eq!(stats.values_destroyed, 2);
    assert_eq!(stats.double_frees, 0);
    assert!(mock.is_value_alive(&raw.0));
    assert_eq!(registry.live_count(), 0);
}

#[test]
fn borrowed_values_are_never_released() {
    let (mock, _engine, registry) = setup();
    let string = mock.new_string("engine owned");
    let owner = ();
    {
        let borrowed = registry.borrow::<NativeString, _>(string, &owner);
        let copy = borrowed;
        assert_eq!(copy.get(), string);
    }
    assert!(mock.is_value_alive(&string.0));
    assert_eq!(mock.stats().values_destroyed, 0);
    assert_eq!(registry.live_count(), 0);
}

#[test]
fn destroyed_object_is_reported_as_invalidated() {
    let (mock, engine, registry) = setup();
    let node = mock.spawn("Node");
    let weak = registry.assert_live::<Object>(node).unwrap();
    assert_eq!(weak.get(), Ok(node));

    mock.destroy(node);
    assert!(!weak.is_alive());
    assert_eq!(
        weak.get(),
        Err(BridgeError::Invalidated {
            instance_id: weak.instance_id().0
        })
    );
    assert_eq!(
        engine.instance_from_id(weak.instance_id()),
        Ok(None),
        "the engine no longer knows the id"
    );
}

#[test]
fn release_after_end_is_a_no_op() {
    let (mock, _engine, registry) = setup();
    let owned = registry.adopt::<NativeString>(mock.new_string("kept")).unwrap();
    let id = owned.id();
    let raw = owned.end().unwrap();

    assert!(!registry.release(id));
    assert!(!registry.release(id));
    assert_eq!(registry.end(id), None);
    assert!(mock.is_value_alive(&raw.0));
    assert_eq!(mock.stats().values_destroyed, 0);
}

#[test]
fn second_owner_of_a_handle_is_rejected() {
    let (mock, _engine, registry) = setup();
    let string = mock.new_string("contested");
    let _first = registry.adopt::<NativeString>(string).unwrap();
    assert!(matches!(
        registry.adopt::<NativeString>(string),
        Err(BridgeError::AlreadyOwned { .. })
    ));
}

#[test]
fn cycle_through_a_native_container_is_broken() {
    let (mock, engine, registry) = setup();

    let shared = registry
        .adopt_ref::<RefCounted>(mock.spawn("RefCounted"))
        .unwrap();
    let array = registry
        .adopt::<Array>(engine.construct_value::<Array>().unwrap())
        .unwrap();
    mock.array_push_object(array.get().unwrap(), shared.get().unwrap());
    assert_eq!(mock.ref_count(shared.get().unwrap()), Some(2));

    assert!(registry.hold(&shared, &array));
    assert!(registry.hold(&array, &shared));
    let (shared_id, array_id) = (shared.id(), array.id());
    drop(shared);
    drop(array);
    assert!(registry.is_deferred(shared_id));
    assert!(registry.is_deferred(array_id));
    assert_eq!(mock.live_objects(), 1);

    let report = registry.cycle();
    assert_eq!(report, CycleReport { released: 2, live: 0 });
    assert_eq!(mock.live_objects(), 0);
    assert_eq!(mock.live_values(), 0);
    assert_eq!(mock.stats().double_frees, 0);
}

// =============================================================================
// Frames and dispatch
// =============================================================================

#[test]
fn echoed_vector_leaves_string_argument_alone() {
    let (mock, engine, registry) = setup();
    mock.bind_method("Node", "echo_vector", 77, |call: &mut MockCall| {
        let vector: Vector3 = call.arg(1).unwrap_or_default();
        call.set_return(vector);
    });
    let string = registry
        .adopt::<NativeString>(mock.new_string("hello"))
        .unwrap();
    let node = mock.spawn("Node");
    let target = engine.method_bind("Node", "echo_vector", 77).unwrap();

    let mut frame = Frame::new();
    frame
        .push(42i64)
        .push(Vector3::new(1.0, 2.0, 3.0))
        .push(string.get().unwrap());
    let ret = frame.reserve_return::<Vector3>();
    unsafe { engine.call(&target, node, &mut frame) }.unwrap();
    let vector = frame.read_return(ret).unwrap();
    frame.free();

    assert_eq!(vector, Vector3::new(1.0, 2.0, 3.0));
    assert!(mock.is_value_alive(&string.get().unwrap().0));
    assert_eq!(mock.stats().values_destroyed, 0);
    assert_eq!(engine.read_string(&string.get().unwrap()).unwrap(), "hello");
}

fn echo<T>(mock: &MockEngine, engine: &Engine, method: &str, value: T) -> T
where
    T: FrameArg + FrameRet + Default + 'static,
{
    mock.bind_method("Node", method, 1, |call: &mut MockCall| {
        let value: T = call.arg(0).unwrap_or_default();
        call.set_return(value);
    });
    let target = engine.method_bind("Node", method, 1).unwrap();
    let node = mock.spawn("Node");
    let mut frame = Frame::new();
    frame.push(value);
    let ret = frame.reserve_return::<T>();
    unsafe { engine.call(&target, node, &mut frame) }.unwrap();
    frame.read_return(ret).unwrap()
}

#[test]
fn values_survive_a_trip_through_the_engine() {
    let (mock, engine, _registry) = setup();
    assert_eq!(echo(&mock, &engine, "echo_int", -7i64), -7);
    assert!(echo(&mock, &engine, "echo_bool", true));
    assert_eq!(echo(&mock, &engine, "echo_float", 0.125f64), 0.125);
    assert_eq!(echo(&mock, &engine, "echo_color", Color::WHITE), Color::WHITE);
    assert_eq!(
        echo(&mock, &engine, "echo_transform", Transform3D::IDENTITY),
        Transform3D::IDENTITY
    );
    let callable = Words::new([3, 9]);
    assert_eq!(echo(&mock, &engine, "echo_callable", callable), callable);
}

#[test]
fn return_slot_from_an_earlier_reservation_is_refused() {
    let (mock, engine, _registry) = setup();
    mock.bind_method("Node", "echo_flag", 5, |call: &mut MockCall| {
        let flag: bool = call.arg(0).unwrap_or_default();
        call.set_return(flag);
    });
    let target = engine.method_bind("Node", "echo_flag", 5).unwrap();
    let node = mock.spawn("Node");

    let mut frame = Frame::new();
    frame.push(true);
    let wide = frame.reserve_return::<Vector3>();
    let narrow = frame.reserve_return::<bool>();
    unsafe { engine.call(&target, node, &mut frame) }.unwrap();

    assert!(matches!(
        frame.read_return(wide),
        Err(ConversionError::StaleReturnSlot { .. })
    ));
    assert_eq!(frame.read_return(narrow), Ok(true));
}

#[test]
fn unknown_method_is_a_configuration_error() {
    let (_mock, engine, _registry) = setup();
    assert!(matches!(
        engine.method_bind("Node", "does_not_exist", 1),
        Err(BridgeError::UnknownMethod { .. })
    ));
}

#[test]
fn concurrent_resolution_happens_once() {
    init_tracing();
    let mock = MockEngine::new();
    let engine = Engine::new(mock.clone());
    let barrier = Barrier::new(2);

    let tables: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    let table = engine.resolve().unwrap();
                    table as *const DispatchTable as usize
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(tables[0], tables[1]);
    assert_eq!(mock.loads(), proc_names::REQUIRED.len());
}

#[test]
fn missing_entry_point_fails_every_caller() {
    init_tracing();
    let mock = MockEngine::without_proc(proc_names::OBJECT_DESTROY);
    let engine = Engine::new(mock.clone());
    let first = engine.resolve().map(|_| ()).unwrap_err();
    let second = engine.resolve().map(|_| ()).unwrap_err();
    assert_eq!(first, second);
    assert!(matches!(first, BridgeError::MissingProc { .. }));
    assert!(engine.construct("Node").is_err());
}
