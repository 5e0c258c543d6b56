//! Per-class and per-instance state behind the engine's opaque pointers.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use enginebridge_core::abi::ConstPtr;
use enginebridge_core::{BridgeResult, InitLevel, NativeError, ObjectPtr, Words};
use enginebridge_frame::{ArgsView, ReturnView};
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use super::builder::VirtualFn;
use super::call::VirtualCall;
use super::class::{ErasedInstance, ExtensionClass, InstanceBase, ParentClass, VirtualSignature};
use super::instances::{self, InstanceHandle};
use crate::ownership::Registry;

/// Lifecycle of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassState {
    Unregistered,
    Registered,
    /// At least one instance is alive.
    Instantiated,
    /// Unregistered from the engine; instances may still be draining.
    Finalized,
}

/// What happened to a virtual call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// No host override; the engine runs its own implementation.
    Fallthrough,
    /// The override failed; the error was logged and the return zeroed.
    Failed,
}

type ErasedHandler =
    Box<dyn Fn(&mut dyn ErasedInstance, &mut VirtualCall<'_>) -> Result<(), NativeError>>;

pub(crate) struct VirtualEntry {
    pub signature: &'static VirtualSignature,
    handler: ErasedHandler,
}

impl VirtualEntry {
    pub fn new<T: ExtensionClass>(
        signature: &'static VirtualSignature,
        handler: VirtualFn<T>,
    ) -> Self {
        Self {
            signature,
            handler: Box::new(move |instance, call| {
                let this = instance.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
                    NativeError::other(format!("instance is not a {}", T::CLASS_NAME))
                })?;
                handler(this, call)
            }),
        }
    }
}

pub(crate) struct ClassEntry {
    pub name: &'static str,
    pub parent: &'static ParentClass,
    pub level: InitLevel,
    pub name_words: Words<1>,
    pub registry: Registry,
    pub factory: fn(InstanceBase) -> Box<dyn ErasedInstance>,
    /// Keyed by the interned StringName of the method.
    pub virtuals: FxHashMap<u64, Box<VirtualEntry>>,
    pub state: Cell<ClassState>,
    pub instances: Cell<usize>,
}

impl ClassEntry {
    pub fn userdata(self: &Rc<Self>) -> *mut c_void {
        Rc::as_ptr(self) as *mut c_void
    }

    /// Recover the entry from the userdata pointer registered with the engine.
    ///
    /// # Safety
    ///
    /// `userdata` must come from [`userdata`](Self::userdata) on an entry
    /// that is still alive.
    pub unsafe fn from_userdata(userdata: *mut c_void) -> Rc<Self> {
        let ptr = userdata as *const Self;
        unsafe {
            Rc::increment_strong_count(ptr);
            Rc::from_raw(ptr)
        }
    }

    /// Build the native parent object and attach a new host instance to it.
    pub fn instantiate(self: &Rc<Self>) -> BridgeResult<ObjectPtr> {
        let engine = self.registry.engine();
        let object = engine.construct(self.parent.name)?;
        let instance_id = engine.instance_id(object)?;
        let value = (self.factory)(InstanceBase::new(object, instance_id));
        let handle = instances::insert(InstanceCell {
            class: Rc::clone(self),
            object,
            value: RefCell::new(value),
        });
        if let Err(err) = engine.set_instance(object, self.name_words, handle.to_ptr()) {
            drop(instances::remove(handle));
            return Err(err);
        }
        self.instances.set(self.instances.get() + 1);
        if self.state.get() == ClassState::Registered {
            self.state.set(ClassState::Instantiated);
        }
        trace!(class = self.name, ?object, %instance_id, "instance created");
        Ok(object.object())
    }

    pub fn instance_freed(&self) {
        let remaining = self.instances.get().saturating_sub(1);
        self.instances.set(remaining);
        if remaining == 0 && self.state.get() == ClassState::Instantiated {
            self.state.set(ClassState::Registered);
        }
    }
}

pub(crate) fn make<T: ExtensionClass>(base: InstanceBase) -> Box<dyn ErasedInstance> {
    Box::new(T::create(base))
}

/// A live host instance.
pub(crate) struct InstanceCell {
    pub class: Rc<ClassEntry>,
    pub object: Words<1>,
    pub value: RefCell<Box<dyn ErasedInstance>>,
}

impl InstanceCell {
    /// Run one virtual override.
    ///
    /// # Safety
    ///
    /// `args` and `ret` must match `entry`'s signature.
    unsafe fn invoke(
        &self,
        entry: &VirtualEntry,
        args: *const ConstPtr,
        ret: *mut c_void,
    ) -> Result<(), NativeError> {
        let mut value = self
            .value
            .try_borrow_mut()
            .map_err(|_| NativeError::Reentrant {
                class: self.class.name,
            })?;
        let signature = entry.signature;
        let args = unsafe { ArgsView::from_raw(args, signature.args) };
        let ret = unsafe { ReturnView::from_raw(ret, signature.ret) };
        let mut call = VirtualCall::new(args, ret, &self.class.registry);
        (entry.handler)(value.as_mut(), &mut call)
    }

    pub fn notify_reference(&self, incremented: bool) {
        match self.value.try_borrow_mut() {
            Ok(mut value) => value.notify_reference(incremented),
            Err(_) => trace!(class = self.class.name, "instance busy, reference notice skipped"),
        }
    }
}

/// Run `f`, turning a panic into an error.
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R, NativeError>) -> Result<R, NativeError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(NativeError::from_panic(payload.as_ref())),
    }
}

/// Run a virtual override at the boundary: nothing unwinds out, and a failure
/// leaves a zeroed return slot.
///
/// # Safety
///
/// `args` and `ret` must match `entry`'s signature.
pub(crate) unsafe fn run_virtual(
    cell: &InstanceCell,
    entry: &VirtualEntry,
    args: *const ConstPtr,
    ret: *mut c_void,
) -> Dispatch {
    match guarded(|| unsafe { cell.invoke(entry, args, ret) }) {
        Ok(()) => Dispatch::Handled,
        Err(err) => {
            let call_error = err.call_error();
            error!(
                class = cell.class.name,
                method = entry.signature.name,
                kind = ?call_error.kind(),
                error = %err,
                "virtual method failed"
            );
            let mut ret = unsafe { ReturnView::from_raw(ret, entry.signature.ret) };
            ret.zero_fill();
            Dispatch::Failed
        }
    }
}

/// Look up the instance behind an engine-held pointer.
pub(crate) fn instance_at(ptr: *mut c_void) -> Result<Rc<InstanceCell>, NativeError> {
    let handle = InstanceHandle::from_ptr(ptr).ok_or(NativeError::StaleInstance { index: 0 })?;
    instances::get(handle).ok_or(NativeError::StaleInstance {
        index: handle.index,
    })
}
