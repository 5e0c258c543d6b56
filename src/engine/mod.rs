//! Engine handle: the dispatch table and the calls made through it.
//!
//! An [`Engine`] is created explicitly from a [`ProcLoader`] and passed to
//! everything that talks to the native side. Entry points are resolved lazily,
//! on first use, exactly once per engine; method binds and interned names are
//! cached alongside the table for the engine's lifetime.

mod methods;
mod table;

use std::ffi::{c_char, c_void};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use enginebridge_core::abi::{
    ConstPtr, InstancePtr, MethodBindPtr, ObjectPtr, PtrConstructorFn, PtrDestructorFn,
    ref_counted_hashes,
};
use enginebridge_core::{
    BridgeError, BridgeResult, ClassCreationInfo, ConversionError, EngineProperty, NameHash,
    NativeType, Properties, ProcLoader, RawHandle, VariantType, Words,
};
use enginebridge_frame::{CallDispatch, Frame, PoolSettings};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

pub use methods::{MethodSpec, MethodTable};
pub use table::DispatchTable;

const VARIANT_TYPE_COUNT: usize = VariantType::PackedVector4Array as usize + 1;

/// Engine-assigned id of a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resolved method bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget {
    bind: usize,
    key: NameHash,
}

impl CallTarget {
    /// Hash of the class, method and signature hash this bind was resolved from.
    pub fn key(&self) -> NameHash {
        self.key
    }

    pub(crate) fn bind_ptr(&self) -> MethodBindPtr {
        self.bind as MethodBindPtr
    }
}

/// Handle to the native engine.
///
/// Cloning is cheap and every clone shares one dispatch table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    loader: Box<dyn ProcLoader>,
    properties: Properties,
    table: OnceLock<BridgeResult<DispatchTable>>,
    names: Mutex<FxHashMap<String, Words<1>>>,
    binds: RwLock<FxHashMap<NameHash, CallTarget>>,
    destructors: [OnceLock<Option<PtrDestructorFn>>; VARIANT_TYPE_COUNT],
    constructors: [OnceLock<Option<PtrConstructorFn>>; VARIANT_TYPE_COUNT],
}

impl Engine {
    /// Create an engine with default [`Properties`].
    pub fn new(loader: impl ProcLoader + 'static) -> Self {
        Self::with_properties(loader, Properties::new())
    }

    /// Create an engine with explicit [`Properties`].
    ///
    /// [`EngineProperty::FramePoolSize`] and [`EngineProperty::FrameInitialWords`]
    /// size the frame pool, which is shared by the whole process. Creating a
    /// second engine with different values replaces the first engine's
    /// settings.
    pub fn with_properties(loader: impl ProcLoader + 'static, properties: Properties) -> Self {
        let pool = PoolSettings {
            limit: properties.get(EngineProperty::FramePoolSize),
            initial_words: properties.get(EngineProperty::FrameInitialWords),
        };
        let previous = enginebridge_frame::configure_pool(pool);
        if previous != pool {
            debug!(?previous, current = ?pool, "frame pool resized");
        }
        Self {
            inner: Arc::new(EngineInner {
                loader: Box::new(loader),
                properties,
                table: OnceLock::new(),
                names: Mutex::new(FxHashMap::default()),
                binds: RwLock::new(FxHashMap::default()),
                destructors: [const { OnceLock::new() }; VARIANT_TYPE_COUNT],
                constructors: [const { OnceLock::new() }; VARIANT_TYPE_COUNT],
            }),
        }
    }

    /// Resolve the dispatch table, or return the one already resolved.
    ///
    /// Concurrent first callers block on a single resolution and all observe
    /// its outcome, including a failed one.
    pub fn resolve(&self) -> BridgeResult<&DispatchTable> {
        self.inner
            .table
            .get_or_init(|| DispatchTable::resolve(self.inner.loader.as_ref()))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.table.get().is_some()
    }

    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    /// Library token passed back to the engine on class registration.
    pub fn library(&self) -> *mut c_void {
        self.inner.loader.library()
    }

    /// Interned StringName for `name`, created on first request.
    ///
    /// The engine keeps one reference per name and releases it when dropped.
    pub fn string_name(&self, name: &str) -> BridgeResult<Words<1>> {
        let mut names = self
            .inner
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(words) = names.get(name) {
            return Ok(*words);
        }
        let table = self.resolve()?;
        let mut words = Words::<1>::NULL;
        // SAFETY: `words` is writable StringName storage.
        unsafe {
            (table.string_name_new_with_utf8_chars_and_len)(
                words.as_mut_ptr(),
                name.as_ptr().cast::<c_char>(),
                name.len() as i64,
            )
        };
        names.insert(name.to_string(), words);
        Ok(words)
    }

    /// Create a native String. The caller owns the result.
    pub fn new_string(&self, text: &str) -> BridgeResult<Words<1>> {
        let table = self.resolve()?;
        let mut words = Words::<1>::NULL;
        // SAFETY: `words` is writable String storage.
        unsafe {
            (table.string_new_with_utf8_chars_and_len)(
                words.as_mut_ptr(),
                text.as_ptr().cast::<c_char>(),
                text.len() as i64,
            )
        };
        Ok(words)
    }

    /// Copy the contents of a native String.
    pub fn read_string(&self, string: &Words<1>) -> BridgeResult<String> {
        let table = self.resolve()?;
        // SAFETY: a null buffer asks only for the length.
        let len = unsafe { (table.string_to_utf8_chars)(string.as_ptr(), std::ptr::null_mut(), 0) };
        let mut buf = vec![0u8; len.max(0) as usize];
        if !buf.is_empty() {
            // SAFETY: `buf` has room for `len` bytes.
            unsafe {
                (table.string_to_utf8_chars)(
                    string.as_ptr(),
                    buf.as_mut_ptr().cast::<c_char>(),
                    len,
                )
            };
        }
        String::from_utf8(buf).map_err(|_| ConversionError::InvalidUtf8.into())
    }

    /// Resolve the method bind for `class::method` with signature `hash`.
    ///
    /// Results are cached per engine. An unknown method is a version mismatch
    /// between the bindings and the engine.
    pub fn method_bind(&self, class: &str, method: &str, hash: i64) -> BridgeResult<CallTarget> {
        let key = NameHash::from_method(class, method, hash);
        if let Some(target) = self
            .inner
            .binds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*target);
        }

        let table = self.resolve()?;
        let class_name = self.string_name(class)?;
        let method_name = self.string_name(method)?;
        // SAFETY: both names are live interned StringNames.
        let bind = unsafe {
            (table.classdb_get_method_bind)(class_name.as_ptr(), method_name.as_ptr(), hash)
        };
        if bind.is_null() {
            return Err(BridgeError::UnknownMethod {
                class: class.to_string(),
                method: method.to_string(),
                hash,
            });
        }
        let target = CallTarget {
            bind: bind as usize,
            key,
        };
        self.inner
            .binds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, target);
        debug!(class, method, hash, key = %key, "resolved method bind");
        Ok(target)
    }

    /// Call `target` on `object` with the arguments pushed to `frame`.
    ///
    /// # Safety
    ///
    /// The frame must match the signature of the method behind `target`, and
    /// `object` must be a live instance of a class that has it.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub unsafe fn call(
        &self,
        target: &CallTarget,
        object: Words<1>,
        frame: &mut Frame,
    ) -> BridgeResult<()> {
        unsafe { frame.invoke(self, target, object.object()) }
    }

    /// Like [`call`](Self::call), but first checks that `instance_id` still
    /// names `object` when the [`EngineProperty::AssertInstanceIds`] property is
    /// set.
    ///
    /// # Safety
    ///
    /// As for [`call`](Self::call), apart from the liveness of `object`.
    pub unsafe fn call_checked(
        &self,
        target: &CallTarget,
        object: Words<1>,
        instance_id: InstanceId,
        frame: &mut Frame,
    ) -> BridgeResult<()> {
        if self.properties().flag(EngineProperty::AssertInstanceIds)
            && !self.is_alive(object, instance_id)?
        {
            return Err(BridgeError::Invalidated {
                instance_id: instance_id.0,
            });
        }
        unsafe { self.call(target, object, frame) }
    }

    /// Construct a native object of `class`.
    pub fn construct(&self, class: &str) -> BridgeResult<Words<1>> {
        let table = self.resolve()?;
        let name = self.string_name(class)?;
        // SAFETY: `name` is a live interned StringName.
        let object = unsafe { (table.classdb_construct_object)(name.as_ptr()) };
        if object.is_null() {
            return Err(BridgeError::UnknownClass {
                class: class.to_string(),
            });
        }
        trace!(class, object = ?Words::from_object(object), "constructed object");
        Ok(Words::from_object(object))
    }

    pub fn singleton(&self, name: &str) -> BridgeResult<Words<1>> {
        let table = self.resolve()?;
        let interned = self.string_name(name)?;
        // SAFETY: `interned` is a live interned StringName.
        let object = unsafe { (table.global_get_singleton)(interned.as_ptr()) };
        if object.is_null() {
            return Err(BridgeError::UnknownSingleton {
                name: name.to_string(),
            });
        }
        Ok(Words::from_object(object))
    }

    /// Instance id of a live object.
    ///
    /// `object` must not have been destroyed; use the id to check liveness
    /// later.
    pub fn instance_id(&self, object: Words<1>) -> BridgeResult<InstanceId> {
        if object.is_null() {
            return Err(BridgeError::NullObject);
        }
        let table = self.resolve()?;
        // SAFETY: the caller vouches that `object` is live.
        let id = unsafe { (table.object_get_instance_id)(object.object()) };
        if id == 0 {
            return Err(BridgeError::Invalidated { instance_id: 0 });
        }
        Ok(InstanceId(id))
    }

    /// The object `instance_id` names, if it is still alive.
    pub fn instance_from_id(&self, instance_id: InstanceId) -> BridgeResult<Option<Words<1>>> {
        let table = self.resolve()?;
        // SAFETY: lookups by id are valid for any id.
        let object = unsafe { (table.object_get_instance_from_id)(instance_id.0) };
        Ok((!object.is_null()).then(|| Words::from_object(object)))
    }

    /// Whether `instance_id` still names `object`.
    pub fn is_alive(&self, object: Words<1>, instance_id: InstanceId) -> BridgeResult<bool> {
        Ok(self.instance_from_id(instance_id)? == Some(object))
    }

    /// Destroy a native object.
    pub fn destroy(&self, object: Words<1>) -> BridgeResult<()> {
        if object.is_null() {
            return Err(BridgeError::NullObject);
        }
        let table = self.resolve()?;
        // SAFETY: the caller owns `object`.
        unsafe { (table.object_destroy)(object.object()) };
        Ok(())
    }

    fn destructor(&self, variant_type: VariantType) -> BridgeResult<Option<PtrDestructorFn>> {
        let table = self.resolve()?;
        let slot = &self.inner.destructors[variant_type as usize];
        // SAFETY: type codes come from `VariantType`.
        Ok(*slot.get_or_init(|| unsafe { (table.variant_get_ptr_destructor)(variant_type.into()) }))
    }

    fn constructor(&self, variant_type: VariantType) -> BridgeResult<Option<PtrConstructorFn>> {
        let table = self.resolve()?;
        let slot = &self.inner.constructors[variant_type as usize];
        // SAFETY: type codes come from `VariantType`.
        Ok(*slot.get_or_init(|| unsafe {
            (table.variant_get_ptr_constructor)(variant_type.into(), 0)
        }))
    }

    /// Run the native destructor for a value of `variant_type` stored in
    /// `words`. Plain-data types have nothing to destroy.
    pub fn destroy_value(&self, variant_type: VariantType, words: &mut [u64]) -> BridgeResult<()> {
        match self.destructor(variant_type)? {
            // SAFETY: `words` holds a live value of `variant_type`.
            Some(destructor) => unsafe { destructor(words.as_mut_ptr().cast()) },
            None if variant_type.needs_destructor() => {
                return Err(BridgeError::MissingTypeOperation {
                    operation: "destructor",
                    variant_type,
                });
            }
            None => {}
        }
        Ok(())
    }

    /// Default-construct a value of `T`. The caller owns the result.
    pub fn construct_value<T: NativeType>(&self) -> BridgeResult<T::Raw> {
        let Some(constructor) = self.constructor(T::VARIANT_TYPE)? else {
            return Err(BridgeError::MissingTypeOperation {
                operation: "constructor",
                variant_type: T::VARIANT_TYPE,
            });
        };
        let mut words = [0u64; 3];
        // SAFETY: three words hold any handle; the default constructor takes
        // no arguments.
        unsafe { constructor(words.as_mut_ptr().cast(), std::ptr::null()) };
        Ok(T::Raw::from_words(&words[..<T::Raw as RawHandle>::WORDS]))
    }

    /// Add a reference to a RefCounted object.
    pub fn reference(&self, object: Words<1>) -> BridgeResult<bool> {
        self.ref_counted_call("reference", ref_counted_hashes::REFERENCE, object)
    }

    /// Drop a reference. Returns `true` when the count reached zero and the
    /// caller must destroy the object.
    pub fn unreference(&self, object: Words<1>) -> BridgeResult<bool> {
        self.ref_counted_call("unreference", ref_counted_hashes::UNREFERENCE, object)
    }

    pub fn reference_count(&self, object: Words<1>) -> BridgeResult<i32> {
        let target = self.method_bind(
            "RefCounted",
            "get_reference_count",
            ref_counted_hashes::GET_REFERENCE_COUNT,
        )?;
        let mut frame = Frame::new();
        let slot = frame.reserve_return::<i32>();
        // SAFETY: get_reference_count takes no arguments and returns an int32.
        unsafe { self.call(&target, object, &mut frame)? };
        Ok(frame.read_return(slot)?)
    }

    fn ref_counted_call(&self, method: &str, hash: i64, object: Words<1>) -> BridgeResult<bool> {
        if object.is_null() {
            return Err(BridgeError::NullObject);
        }
        let target = self.method_bind("RefCounted", method, hash)?;
        let mut frame = Frame::new();
        let slot = frame.reserve_return::<bool>();
        // SAFETY: both methods take no arguments and return a bool.
        unsafe { self.call(&target, object, &mut frame)? };
        Ok(frame.read_return(slot)?)
    }

    pub(crate) fn set_instance(
        &self,
        object: Words<1>,
        class_name: Words<1>,
        instance: InstancePtr,
    ) -> BridgeResult<()> {
        let table = self.resolve()?;
        // SAFETY: `object` was just constructed and `class_name` is interned.
        unsafe { (table.object_set_instance)(object.object(), class_name.as_ptr(), instance) };
        Ok(())
    }

    pub(crate) fn register_class(
        &self,
        class_name: Words<1>,
        parent_name: Words<1>,
        info: &ClassCreationInfo,
    ) -> BridgeResult<()> {
        let table = self.resolve()?;
        // SAFETY: the engine copies `info`; its userdata outlives registration.
        unsafe {
            (table.classdb_register_extension_class)(
                self.library(),
                class_name.as_ptr(),
                parent_name.as_ptr(),
                info,
            )
        };
        Ok(())
    }

    pub(crate) fn unregister_class(&self, class_name: Words<1>) -> BridgeResult<()> {
        let table = self.resolve()?;
        // SAFETY: `class_name` is interned.
        unsafe { (table.classdb_unregister_extension_class)(self.library(), class_name.as_ptr()) };
        Ok(())
    }

    /// Whether two handles refer to the same engine.
    pub fn same_engine(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl CallDispatch for Engine {
    type Target = CallTarget;
    type Error = BridgeError;

    unsafe fn ptrcall(
        &self,
        target: &CallTarget,
        object: ObjectPtr,
        args: *const ConstPtr,
        ret: *mut c_void,
    ) -> BridgeResult<()> {
        let table = self.resolve()?;
        unsafe { (table.object_method_bind_ptrcall)(target.bind_ptr(), object, args, ret) };
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .inner
            .names
            .lock()
            .map(|names| names.len())
            .unwrap_or_default();
        f.debug_struct("Engine")
            .field("resolved", &self.is_resolved())
            .field("interned_names", &names)
            .finish_non_exhaustive()
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let Some(Ok(table)) = self.table.get() else {
            return;
        };
        let names = std::mem::take(self.names.get_mut().unwrap_or_else(PoisonError::into_inner));
        if names.is_empty() {
            return;
        }
        // SAFETY: StringName is a valid type code.
        let Some(destructor) =
            (unsafe { (table.variant_get_ptr_destructor)(VariantType::StringName.into()) })
        else {
            return;
        };
        trace!(count = names.len(), "releasing interned names");
        for (_, mut words) in names {
            // SAFETY: each name was created by this engine and is released once.
            unsafe { destructor(words.as_mut_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginebridge_core::Vector3;
    use enginebridge_mock::MockEngine;

    fn engine() -> (MockEngine, Engine) {
        let mock = MockEngine::new();
        (mock.clone(), Engine::new(mock))
    }

    #[test]
    fn engine_properties_size_the_shared_frame_pool() {
        let (_mock, _engine) = engine();
        assert_eq!(
            enginebridge_frame::pool_settings(),
            PoolSettings {
                limit: EngineProperty::FramePoolSize.default_value(),
                initial_words: EngineProperty::FrameInitialWords.default_value(),
            }
        );
    }

    #[test]
    fn resolve_is_lazy() {
        let (mock, engine) = engine();
        assert!(!engine.is_resolved());
        assert_eq!(mock.loads(), 0);
        engine.resolve().unwrap();
        engine.resolve().unwrap();
        assert!(engine.is_resolved());
        assert_eq!(mock.loads(), enginebridge_core::abi::proc_names::REQUIRED.len());
    }

    #[test]
    fn failed_resolution_is_reported_to_every_caller() {
        let mock = MockEngine::without_proc(enginebridge_core::abi::proc_names::OBJECT_DESTROY);
        let engine = Engine::new(mock);
        let first = engine.resolve().unwrap_err();
        let second = engine.resolve().unwrap_err();
        assert_eq!(first, second);
        assert!(matches!(first, BridgeError::MissingProc { .. }));
    }

    #[test]
    fn names_are_interned_once() {
        let (mock, engine) = engine();
        let a = engine.string_name("Node").unwrap();
        let b = engine.string_name("Node").unwrap();
        assert_eq!(a, b);
        assert_eq!(mock.live_names(), 1);
    }

    #[test]
    fn dropping_the_engine_releases_names() {
        let (mock, engine) = engine();
        engine.string_name("Node").unwrap();
        engine.string_name("add_child").unwrap();
        drop(engine);
        assert_eq!(mock.live_names(), 0);
        assert_eq!(mock.stats().double_frees, 0);
    }

    #[test]
    fn strings_round_trip() {
        let (mock, engine) = engine();
        let string = engine.new_string("héllo").unwrap();
        assert_eq!(mock.string_value(string).as_deref(), Some("héllo"));
        assert_eq!(engine.read_string(&string).unwrap(), "héllo");
        assert_eq!(engine.read_string(&mock.new_string("")).unwrap(), "");
    }

    #[test]
    fn method_binds_are_cached() {
        let (mock, engine) = engine();
        mock.bind_method("Node3D", "get_position", 3360562783, |call| {
            call.set_return(Vector3::new(1.0, 2.0, 3.0))
        });
        mock.define_class("Node3D", "Node");
        let a = engine.method_bind("Node3D", "get_position", 3360562783).unwrap();
        let b = engine.method_bind("Node3D", "get_position", 3360562783).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), NameHash::from_method("Node3D", "get_position", 3360562783));

        let node = mock.spawn("Node3D");
        let mut frame = Frame::new();
        let slot = frame.reserve_return::<Vector3>();
        unsafe { engine.call(&a, node, &mut frame) }.unwrap();
        assert_eq!(frame.read_return(slot), Ok(Vector3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn unknown_method_is_an_error() {
        let (_mock, engine) = engine();
        let err = engine.method_bind("Node", "no_such_method", 1).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownMethod { .. }));
    }

    #[test]
    fn construct_and_destroy() {
        let (mock, engine) = engine();
        let node = engine.construct("Node").unwrap();
        assert_eq!(mock.class_of(node).as_deref(), Some("Node"));
        let id = engine.instance_id(node).unwrap();
        assert!(engine.is_alive(node, id).unwrap());

        engine.destroy(node).unwrap();
        assert!(!engine.is_alive(node, id).unwrap());
        assert_eq!(engine.instance_from_id(id).unwrap(), None);
        assert!(matches!(
            engine.construct("NoSuchClass"),
            Err(BridgeError::UnknownClass { .. })
        ));
    }

    #[test]
    fn singletons() {
        let (mock, engine) = engine();
        let input = mock.add_singleton("Input", "Object");
        assert_eq!(engine.singleton("Input").unwrap(), input);
        assert!(matches!(
            engine.singleton("Missing"),
            Err(BridgeError::UnknownSingleton { .. })
        ));
    }

    #[test]
    fn checked_call_refuses_freed_objects() {
        let (mock, engine) = engine();
        mock.bind_method("Node", "get_child_count", 894402480, |call| call.set_return(0i32));
        let target = engine.method_bind("Node", "get_child_count", 894402480).unwrap();
        let node = mock.spawn("Node");
        let id = engine.instance_id(node).unwrap();
        mock.destroy(node);

        let mut frame = Frame::new();
        let _slot = frame.reserve_return::<i32>();
        let err = unsafe { engine.call_checked(&target, node, id, &mut frame) }.unwrap_err();
        assert_eq!(err, BridgeError::Invalidated { instance_id: id.0 });
        assert_eq!(mock.stats().ptrcalls, 0);
    }

    #[test]
    fn ref_counting_goes_through_method_binds() {
        let (mock, engine) = engine();
        let resource = mock.spawn("Resource");
        assert!(engine.reference(resource).unwrap());
        assert_eq!(engine.reference_count(resource).unwrap(), 2);
        assert!(!engine.unreference(resource).unwrap());
        assert!(engine.unreference(resource).unwrap());
        assert_eq!(mock.ref_count(resource), Some(0));
    }

    #[test]
    fn value_construction_and_destruction() {
        let (mock, engine) = engine();
        let mut array = engine.construct_value::<enginebridge_core::Array>().unwrap();
        assert_eq!(mock.array_len(array), Some(0));
        engine.destroy_value(VariantType::Array, &mut array.0).unwrap();
        assert_eq!(mock.live_values(), 0);

        // Plain data needs no destructor.
        engine.destroy_value(VariantType::Vector3, &mut [0, 0]).unwrap();
        assert!(matches!(
            engine.construct_value::<enginebridge_core::NodePath>(),
            Err(BridgeError::MissingTypeOperation { .. })
        ));
    }
}
