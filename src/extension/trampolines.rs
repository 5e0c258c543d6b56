//! `extern "C"` entry points handed to the engine at class registration.
//!
//! Nothing here may unwind into the engine. Every failure is logged and turned
//! into the neutral result the engine expects: a null object, a null call
//! datum, or a zeroed return slot.

use std::ffi::c_void;

use enginebridge_core::abi::ConstPtr;
use enginebridge_core::{InstancePtr, NativeError, ObjectPtr};
use tracing::{error, trace, warn};

use super::entry::{ClassEntry, guarded, instance_at, run_virtual};
use super::instances::{self, InstanceHandle};

pub(crate) unsafe extern "C" fn create_instance(class_userdata: *mut c_void) -> ObjectPtr {
    // SAFETY: the userdata was registered from a live `ClassEntry`, and the
    // engine only constructs classes that are still registered.
    let entry = unsafe { ClassEntry::from_userdata(class_userdata) };
    match guarded(|| entry.instantiate().map_err(|err| NativeError::other(err.to_string()))) {
        Ok(object) => object,
        Err(err) => {
            error!(class = entry.name, error = %err, "failed to create instance");
            std::ptr::null_mut()
        }
    }
}

pub(crate) unsafe extern "C" fn free_instance(_class_userdata: *mut c_void, instance: InstancePtr) {
    let Some(handle) = InstanceHandle::from_ptr(instance) else {
        warn!("free requested for a null instance");
        return;
    };
    let Some(cell) = instances::remove(handle) else {
        warn!(index = handle.index, "free requested for a stale instance");
        return;
    };
    cell.class.instance_freed();
    trace!(class = cell.class.name, "instance freed");
    // The host value drops here, after the heap borrow has ended.
    if let Err(err) = guarded(move || {
        drop(cell);
        Ok(())
    }) {
        error!(error = %err, "instance destructor failed");
    }
}

pub(crate) unsafe extern "C" fn get_virtual_call_data(
    class_userdata: *mut c_void,
    name: ConstPtr,
) -> *mut c_void {
    if name.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: as in `create_instance`; `name` points to an interned StringName.
    let entry = unsafe { ClassEntry::from_userdata(class_userdata) };
    let key = unsafe { *name.cast::<u64>() };
    match entry.virtuals.get(&key) {
        Some(virtual_entry) => virtual_entry.as_ref() as *const _ as *mut c_void,
        None => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn call_virtual_with_data(
    instance: InstancePtr,
    _name: ConstPtr,
    data: *mut c_void,
    args: *const ConstPtr,
    ret: *mut c_void,
) {
    let cell = match instance_at(instance) {
        Ok(cell) => cell,
        Err(err) => {
            error!(error = %err, "virtual call on a missing instance");
            return;
        }
    };
    // SAFETY: `data` came from `get_virtual_call_data` on this instance's
    // class, which keeps its entries alive while instances exist.
    let virtual_entry = unsafe { &*data.cast::<super::entry::VirtualEntry>() };
    // SAFETY: the engine passes arguments matching the virtual's signature.
    unsafe { run_virtual(&cell, virtual_entry, args, ret) };
}

pub(crate) unsafe extern "C" fn reference(instance: InstancePtr) {
    notify(instance, true);
}

pub(crate) unsafe extern "C" fn unreference(instance: InstancePtr) {
    notify(instance, false);
}

fn notify(instance: InstancePtr, incremented: bool) {
    let result = guarded(|| {
        let cell = instance_at(instance)?;
        cell.notify_reference(incremented);
        Ok(())
    });
    if let Err(err) = result {
        error!(error = %err, incremented, "reference notification failed");
    }
}
