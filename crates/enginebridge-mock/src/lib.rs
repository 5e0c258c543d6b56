//! In-process stand-in for the native engine.
//!
//! [`MockEngine`] implements [`ProcLoader`] and hands out real `extern "C"`
//! entry points, so the bridge is exercised through the same ABI it uses
//! against the engine. Native state lives in a per-thread world: objects,
//! interned names, strings, arrays and method binds created on one thread are
//! invisible to the others, which keeps parallel tests apart.
//!
//! The world keeps counters ([`MockStats`]) that tests use to check that every
//! handle is released exactly once.

mod call;
mod procs;
mod world;

use std::ffi::CStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use enginebridge_core::abi::{self, proc_names};
use enginebridge_core::{ProcLoader, RawProc, VariantType, Words};
use enginebridge_frame::{Frame, FrameRet};
use tracing::trace;

pub use call::MockCall;
pub use world::MockStats;
use world::MockValue;

/// A fake engine for tests.
///
/// Cloning shares the proc-load counter; every clone talks to the world of
/// the thread it is used on.
#[derive(Clone)]
pub struct MockEngine {
    loads: Arc<AtomicUsize>,
    missing: Arc<Vec<&'static CStr>>,
}

impl MockEngine {
    /// Create a mock engine and reset this thread's world.
    pub fn new() -> Self {
        world::reset();
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            missing: Arc::new(Vec::new()),
        }
    }

    /// A mock engine that does not provide `name`.
    pub fn without_proc(name: &'static CStr) -> Self {
        let mut engine = Self::new();
        engine.missing = Arc::new(vec![name]);
        engine
    }

    /// How many entry points have been resolved through this loader.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MockStats {
        world::with(|world| world.stats.clone())
    }

    /// Declare a native class.
    pub fn define_class(&self, name: &str, parent: &str) {
        world::with(|world| world.define_class(name, Some(parent)));
    }

    /// Register a method bind on `class`.
    pub fn bind_method(
        &self,
        class: &str,
        method: &str,
        hash: i64,
        handler: impl Fn(&mut MockCall) + 'static,
    ) {
        world::with(|world| world.bind(class, method, hash, std::rc::Rc::new(handler)));
    }

    /// Create a singleton object reachable through `global_get_singleton`.
    pub fn add_singleton(&self, name: &str, class: &str) -> Words<1> {
        let addr = world::with(|world| {
            let addr = world.spawn(class);
            world.singletons.insert(name.to_string(), addr);
            addr
        });
        Words::new([addr])
    }

    /// Create an object directly, as if the engine had made it on its own.
    pub fn spawn(&self, class: &str) -> Words<1> {
        Words::new([world::with(|world| world.spawn(class))])
    }

    /// Destroy an object from the engine side.
    pub fn destroy(&self, object: Words<1>) {
        destroy_object(object.0[0]);
    }

    pub fn is_alive(&self, object: Words<1>) -> bool {
        world::with(|world| world.objects.contains_key(&object.0[0]))
    }

    pub fn ref_count(&self, object: Words<1>) -> Option<u32> {
        world::with(|world| world.objects.get(&object.0[0]).and_then(|o| o.ref_count))
    }

    pub fn instance_id(&self, object: Words<1>) -> Option<u64> {
        world::with(|world| world.objects.get(&object.0[0]).map(|o| o.instance_id))
    }

    pub fn class_of(&self, object: Words<1>) -> Option<String> {
        world::with(|world| world.objects.get(&object.0[0]).map(|o| o.class.clone()))
    }

    /// Number of live objects, singletons included.
    pub fn live_objects(&self) -> usize {
        world::with(|world| world.objects.len())
    }

    /// Number of live destructible values (strings, arrays and the like).
    pub fn live_values(&self) -> usize {
        world::with(|world| world.values.len())
    }

    /// Live values of one engine type.
    pub fn live_values_of(&self, variant_type: VariantType) -> usize {
        world::with(|world| {
            world
                .values
                .values()
                .filter(|value| value_type(value) == variant_type)
                .count()
        })
    }

    /// Number of distinct interned names still referenced.
    pub fn live_names(&self) -> usize {
        world::with(|world| world.names.len())
    }

    /// Create an engine String owned by the caller.
    pub fn new_string(&self, text: &str) -> Words<1> {
        Words::new([world::with(|world| {
            world.new_value(MockValue::String(text.to_string()))
        })])
    }

    pub fn string_value(&self, string: Words<1>) -> Option<String> {
        world::with(|world| match world.values.get(&string.0[0]) {
            Some(MockValue::String(text)) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn is_value_alive(&self, value: &[u64]) -> bool {
        value
            .first()
            .is_some_and(|id| world::with(|world| world.values.contains_key(id)))
    }

    /// Store `object` in `array`; the array keeps a reference to it.
    pub fn array_push_object(&self, array: Words<1>, object: Words<1>) {
        world::with(|world| {
            if let Some(MockValue::Array(items)) = world.values.get_mut(&array.0[0]) {
                items.push(object.0[0]);
            }
        });
        adjust_ref_count(object.0[0], 1);
    }

    pub fn array_len(&self, array: Words<1>) -> Option<usize> {
        world::with(|world| match world.values.get(&array.0[0]) {
            Some(MockValue::Array(items)) => Some(items.len()),
            _ => None,
        })
    }

    pub fn is_registered(&self, class: &str) -> bool {
        world::with(|world| {
            world
                .classes
                .get(class)
                .is_some_and(|entry| entry.extension.is_some())
        })
    }

    /// Ask the host to run virtual `name` on `object`, as the engine does.
    ///
    /// Arguments come from `frame`. Returns `None` when the host has no
    /// override and the engine would fall back to its own implementation.
    pub fn call_virtual<R: FrameRet>(
        &self,
        object: Words<1>,
        name: &str,
        frame: &mut Frame,
    ) -> Option<R> {
        let binding = world::with(|world| {
            world.stats.virtual_calls += 1;
            world.objects.get(&object.0[0]).and_then(|o| o.binding)
        })?;
        let name_id = world::with(|world| world.intern(name));
        let name_words = Words::new([name_id]);
        let result = (|| {
            let get_virtual = binding.get_virtual?;
            let call_virtual = binding.call_virtual?;
            // SAFETY: the binding was recorded from the host's registration.
            let data = unsafe { get_virtual(binding.class_userdata, name_words.as_ptr()) };
            if data.is_null() {
                return None;
            }
            let slot = frame.reserve_return::<R>();
            let (args, ret) = frame.raw_parts();
            unsafe { call_virtual(binding.instance, name_words.as_ptr(), data, args, ret) };
            frame.read_return(slot).ok()
        })();
        world::with(|world| world.release_name(name_id));
        result
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEngine")
            .field("loads", &self.loads())
            .finish()
    }
}

macro_rules! procs {
    ($name:expr, $($const:ident => $func:ident: $ty:ty),* $(,)?) => {
        $(
            if $name == proc_names::$const {
                let func: $ty = procs::$func;
                // SAFETY: callers transmute back to the signature named by the entry point.
                return Some(unsafe { std::mem::transmute::<$ty, RawProc>(func) });
            }
        )*
    };
}

impl ProcLoader for MockEngine {
    fn load(&self, name: &CStr) -> Option<RawProc> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.missing.iter().any(|missing| *missing == name) {
            return None;
        }
        trace!(name = ?name, "mock resolving entry point");
        procs!(name,
            OBJECT_METHOD_BIND_PTRCALL => object_method_bind_ptrcall: abi::ObjectMethodBindPtrcallFn,
            CLASSDB_GET_METHOD_BIND => classdb_get_method_bind: abi::ClassdbGetMethodBindFn,
            CLASSDB_CONSTRUCT_OBJECT => classdb_construct_object: abi::ClassdbConstructObjectFn,
            CLASSDB_REGISTER_EXTENSION_CLASS => classdb_register_extension_class: abi::ClassdbRegisterExtensionClassFn,
            CLASSDB_UNREGISTER_EXTENSION_CLASS => classdb_unregister_extension_class: abi::ClassdbUnregisterExtensionClassFn,
            GLOBAL_GET_SINGLETON => global_get_singleton: abi::GlobalGetSingletonFn,
            OBJECT_GET_INSTANCE_FROM_ID => object_get_instance_from_id: abi::ObjectGetInstanceFromIdFn,
            OBJECT_GET_INSTANCE_ID => object_get_instance_id: abi::ObjectGetInstanceIdFn,
            OBJECT_DESTROY => object_destroy: abi::ObjectDestroyFn,
            OBJECT_SET_INSTANCE => object_set_instance: abi::ObjectSetInstanceFn,
            STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN => string_name_new_with_utf8_chars_and_len: abi::StringNameNewWithUtf8CharsAndLenFn,
            STRING_NEW_WITH_UTF8_CHARS_AND_LEN => string_new_with_utf8_chars_and_len: abi::StringNewWithUtf8CharsAndLenFn,
            STRING_TO_UTF8_CHARS => string_to_utf8_chars: abi::StringToUtf8CharsFn,
            VARIANT_GET_PTR_DESTRUCTOR => variant_get_ptr_destructor: abi::VariantGetPtrDestructorFn,
            VARIANT_GET_PTR_CONSTRUCTOR => variant_get_ptr_constructor: abi::VariantGetPtrConstructorFn,
        );
        None
    }

    fn library(&self) -> *mut std::ffi::c_void {
        0xe0 as *mut std::ffi::c_void
    }
}

fn value_type(value: &MockValue) -> VariantType {
    match value {
        MockValue::String(_) => VariantType::String,
        MockValue::Array(_) => VariantType::Array,
        MockValue::Other(variant_type) => *variant_type,
    }
}

/// Change an object's reference count, notifying a bound host instance.
/// Returns the new count, or `None` if the object is gone or not counted.
pub(crate) fn adjust_ref_count(addr: u64, delta: i32) -> Option<u32> {
    let (count, binding) = world::with(|world| {
        if delta > 0 {
            world.stats.references += 1;
        } else {
            world.stats.unreferences += 1;
        }
        let object = world.objects.get_mut(&addr)?;
        let count = object.ref_count.as_mut()?;
        *count = count.saturating_add_signed(delta);
        Some((*count, object.binding))
    })?;
    if let Some(binding) = binding {
        let callback = if delta > 0 {
            binding.reference
        } else {
            binding.unreference
        };
        if let Some(callback) = callback {
            // SAFETY: the binding was recorded from the host's registration.
            unsafe { callback(binding.instance) };
        }
    }
    Some(count)
}

/// Destroy an object, freeing its host instance first.
pub(crate) fn destroy_object(addr: u64) {
    let Ok(binding) = world::with(|world| world.remove_object(addr)) else {
        return;
    };
    if let Some(binding) = binding
        && let Some(free) = binding.free
    {
        world::with(|world| world.stats.instances_freed += 1);
        // SAFETY: the binding was recorded from the host's registration.
        unsafe { free(binding.class_userdata, binding.instance) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginebridge_core::abi::ObjectMethodBindPtrcallFn;

    fn load<T: Copy>(engine: &MockEngine, name: &CStr) -> T {
        let raw = engine.load(name).unwrap();
        assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<RawProc>());
        unsafe { std::mem::transmute_copy::<RawProc, T>(&raw) }
    }

    #[test]
    fn resolves_every_required_entry_point() {
        let engine = MockEngine::new();
        for name in proc_names::REQUIRED {
            assert!(engine.load(name).is_some(), "missing {:?}", name);
        }
        assert!(engine.load(c"not_a_real_proc").is_none());
        assert_eq!(engine.loads(), proc_names::REQUIRED.len() + 1);
    }

    #[test]
    fn missing_proc_is_not_resolved() {
        let engine = MockEngine::without_proc(proc_names::OBJECT_DESTROY);
        assert!(engine.load(proc_names::OBJECT_DESTROY).is_none());
        assert!(engine.load(proc_names::OBJECT_GET_INSTANCE_ID).is_some());
    }

    #[test]
    fn ref_counted_objects_start_with_one_reference() {
        let engine = MockEngine::new();
        let object = engine.spawn("Resource");
        let node = engine.spawn("Node");
        assert_eq!(engine.ref_count(object), Some(1));
        assert_eq!(engine.ref_count(node), None);
    }

    #[test]
    fn arrays_release_their_objects() {
        let engine = MockEngine::new();
        let object = engine.spawn("RefCounted");
        let array = Words::new([world::with(|world| {
            world.new_value(MockValue::Array(Vec::new()))
        })]);
        engine.array_push_object(array, object);
        assert_eq!(engine.ref_count(object), Some(2));

        let destroy: abi::VariantGetPtrDestructorFn =
            load(&engine, proc_names::VARIANT_GET_PTR_DESTRUCTOR);
        let destructor = unsafe { destroy(VariantType::Array.into()) }.unwrap();
        let mut handle = array;
        unsafe { destructor(handle.as_mut_ptr()) };
        assert_eq!(engine.ref_count(object), Some(1));
        assert_eq!(engine.live_values(), 0);
    }

    #[test]
    fn ptrcall_runs_bound_handler() {
        let engine = MockEngine::new();
        engine.bind_method("Node", "get_answer", 7, |call| call.set_return(42i64));
        let node = engine.spawn("Node");

        let ptrcall: ObjectMethodBindPtrcallFn =
            load(&engine, proc_names::OBJECT_METHOD_BIND_PTRCALL);
        let bind = world::with(|world| world.find_bind("Node", "get_answer", 7)).unwrap();
        let mut frame = Frame::new();
        let slot = frame.reserve_return::<i64>();
        unsafe { frame.invoke(&ptrcall, &(bind as usize as _), node.object()) }.unwrap();
        assert_eq!(frame.read_return(slot), Ok(42));
        assert_eq!(engine.stats().ptrcalls, 1);
    }

    #[test]
    fn destroying_twice_is_counted() {
        let engine = MockEngine::new();
        let node = engine.spawn("Node");
        engine.destroy(node);
        engine.destroy(node);
        let stats = engine.stats();
        assert_eq!(stats.objects_destroyed, 1);
        assert_eq!(stats.double_frees, 1);
    }
}
