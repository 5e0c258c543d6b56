//! Entry points the mock engine hands out through its proc loader.
//!
//! Each function borrows the thread's world only long enough to update it;
//! host callbacks run after the borrow ends so they can call back in.

use std::ffi::{c_char, c_void};

use enginebridge_core::VariantType;
use enginebridge_core::abi::{
    ClassCreationInfo, ConstPtr, InstancePtr, MethodBindPtr, ObjectPtr, PtrConstructorFn,
    PtrDestructorFn,
};
use tracing::trace;

use crate::call::MockCall;
use crate::world::{self, InstanceBinding, MockValue};

/// First word of the handle stored at `ptr`.
unsafe fn handle_at(ptr: ConstPtr) -> u64 {
    if ptr.is_null() {
        0
    } else {
        unsafe { *ptr.cast::<u64>() }
    }
}

unsafe fn text_from(chars: *const c_char, len: i64) -> String {
    if chars.is_null() || len <= 0 {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(chars.cast::<u8>(), len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

unsafe fn name_at(ptr: ConstPtr) -> Option<String> {
    let id = unsafe { handle_at(ptr) };
    world::with(|world| world.name_text(id).map(str::to_string))
}

pub(crate) unsafe extern "C" fn object_method_bind_ptrcall(
    method: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstPtr,
    ret: *mut c_void,
) {
    let handler = world::with(|world| {
        world.stats.ptrcalls += 1;
        world
            .binds
            .get(&(method as usize as u64))
            .map(|bind| bind.handler.clone())
    });
    if let Some(handler) = handler {
        let mut call = MockCall::new(object as usize as u64, args, ret);
        handler(&mut call);
    }
}

pub(crate) unsafe extern "C" fn classdb_get_method_bind(
    class: ConstPtr,
    method: ConstPtr,
    hash: i64,
) -> MethodBindPtr {
    let (Some(class), Some(method)) = (unsafe { name_at(class) }, unsafe { name_at(method) })
    else {
        return std::ptr::null();
    };
    world::with(|world| world.find_bind(&class, &method, hash))
        .map_or(std::ptr::null(), |addr| addr as usize as MethodBindPtr)
}

pub(crate) unsafe extern "C" fn classdb_construct_object(class: ConstPtr) -> ObjectPtr {
    let Some(class) = (unsafe { name_at(class) }) else {
        return std::ptr::null_mut();
    };
    enum Plan {
        Extension(ClassCreationInfo),
        Native,
        Unknown,
    }
    let plan = world::with(|world| match world.classes.get(&class) {
        Some(entry) => match entry.extension {
            Some(info) => Plan::Extension(info),
            None => Plan::Native,
        },
        None => Plan::Unknown,
    });
    match plan {
        Plan::Extension(info) => match info.create_instance {
            Some(create) => unsafe { create(info.class_userdata) },
            None => std::ptr::null_mut(),
        },
        Plan::Native => world::with(|world| world.spawn(&class)) as usize as ObjectPtr,
        Plan::Unknown => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class(
    _library: *mut c_void,
    class: ConstPtr,
    parent: ConstPtr,
    info: *const ClassCreationInfo,
) {
    let (Some(class), Some(parent)) = (unsafe { name_at(class) }, unsafe { name_at(parent) })
    else {
        return;
    };
    if info.is_null() {
        return;
    }
    let info = unsafe { *info };
    trace!(class = %class, parent = %parent, "mock registered extension class");
    world::with(|world| {
        world.define_class(&class, Some(&parent));
        if let Some(entry) = world.classes.get_mut(&class) {
            entry.extension = Some(info);
        }
    });
}

pub(crate) unsafe extern "C" fn classdb_unregister_extension_class(
    _library: *mut c_void,
    class: ConstPtr,
) {
    if let Some(class) = unsafe { name_at(class) } {
        world::with(|world| world.classes.remove(&class));
    }
}

pub(crate) unsafe extern "C" fn global_get_singleton(name: ConstPtr) -> ObjectPtr {
    let Some(name) = (unsafe { name_at(name) }) else {
        return std::ptr::null_mut();
    };
    world::with(|world| world.singletons.get(&name).copied())
        .map_or(std::ptr::null_mut(), |addr| addr as usize as ObjectPtr)
}

pub(crate) unsafe extern "C" fn object_get_instance_from_id(instance_id: u64) -> ObjectPtr {
    world::with(|world| world.by_instance_id.get(&instance_id).copied())
        .map_or(std::ptr::null_mut(), |addr| addr as usize as ObjectPtr)
}

pub(crate) unsafe extern "C" fn object_get_instance_id(object: ConstPtr) -> u64 {
    world::with(|world| {
        world
            .objects
            .get(&(object as usize as u64))
            .map_or(0, |object| object.instance_id)
    })
}

pub(crate) unsafe extern "C" fn object_destroy(object: ObjectPtr) {
    crate::destroy_object(object as usize as u64);
}

pub(crate) unsafe extern "C" fn object_set_instance(
    object: ObjectPtr,
    class: ConstPtr,
    instance: InstancePtr,
) {
    let Some(class) = (unsafe { name_at(class) }) else {
        return;
    };
    world::with(|world| {
        let Some(info) = world.classes.get(&class).and_then(|entry| entry.extension) else {
            return;
        };
        if let Some(target) = world.objects.get_mut(&(object as usize as u64)) {
            target.class = class.clone();
            target.binding = Some(InstanceBinding {
                instance,
                class_userdata: info.class_userdata,
                free: info.free_instance,
                reference: info.reference,
                unreference: info.unreference,
                get_virtual: info.get_virtual_call_data,
                call_virtual: info.call_virtual_with_data,
            });
        }
    });
}

pub(crate) unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    dst: *mut c_void,
    chars: *const c_char,
    len: i64,
) {
    let text = unsafe { text_from(chars, len) };
    let id = world::with(|world| world.intern(&text));
    unsafe { dst.cast::<u64>().write(id) };
}

pub(crate) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    dst: *mut c_void,
    chars: *const c_char,
    len: i64,
) {
    let text = unsafe { text_from(chars, len) };
    let id = world::with(|world| world.new_value(MockValue::String(text)));
    unsafe { dst.cast::<u64>().write(id) };
}

pub(crate) unsafe extern "C" fn string_to_utf8_chars(
    string: ConstPtr,
    buf: *mut c_char,
    max: i64,
) -> i64 {
    let id = unsafe { handle_at(string) };
    let text = world::with(|world| match world.values.get(&id) {
        Some(MockValue::String(text)) => text.clone(),
        _ => String::new(),
    });
    let bytes = text.as_bytes();
    if !buf.is_null() && max > 0 {
        let n = bytes.len().min(max as usize);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n) };
    }
    bytes.len() as i64
}

unsafe extern "C" fn destroy_string_name(value: *mut c_void) {
    let id = unsafe { handle_at(value) };
    world::with(|world| world.release_name(id));
}

unsafe extern "C" fn destroy_value(value: *mut c_void) {
    let id = unsafe { handle_at(value) };
    let removed = world::with(|world| {
        let removed = world.values.remove(&id);
        match removed {
            Some(_) => world.stats.values_destroyed += 1,
            None => world.stats.double_frees += 1,
        }
        removed
    });
    // Arrays hold a reference on each object they contain.
    if let Some(MockValue::Array(items)) = removed {
        for item in items {
            if crate::adjust_ref_count(item, -1) == Some(0) {
                crate::destroy_object(item);
            }
        }
    }
}

pub(crate) unsafe extern "C" fn variant_get_ptr_destructor(
    variant_type: u32,
) -> Option<PtrDestructorFn> {
    let variant_type = VariantType::try_from(variant_type).ok()?;
    match variant_type {
        VariantType::StringName => Some(destroy_string_name as PtrDestructorFn),
        other if other.needs_destructor() => Some(destroy_value as PtrDestructorFn),
        _ => None,
    }
}

macro_rules! default_constructors {
    ($($fn_name:ident => $variant:ident, $value:expr;)*) => {
        $(
            unsafe extern "C" fn $fn_name(dst: *mut c_void, _args: *const ConstPtr) {
                let id = world::with(|world| world.new_value($value));
                unsafe { dst.cast::<u64>().write(id) };
                let words = VariantType::$variant.handle_words().unwrap_or(1);
                for i in 1..words {
                    unsafe { dst.cast::<u64>().add(i).write(0) };
                }
            }
        )*

        pub(crate) unsafe extern "C" fn variant_get_ptr_constructor(
            variant_type: u32,
            constructor: i32,
        ) -> Option<PtrConstructorFn> {
            if constructor != 0 {
                return None;
            }
            match VariantType::try_from(variant_type).ok()? {
                $(VariantType::$variant => Some($fn_name as PtrConstructorFn),)*
                _ => None,
            }
        }
    };
}

default_constructors! {
    construct_string => String, MockValue::String(String::new());
    construct_array => Array, MockValue::Array(Vec::new());
    construct_dictionary => Dictionary, MockValue::Other(VariantType::Dictionary);
    construct_callable => Callable, MockValue::Other(VariantType::Callable);
    construct_packed_int32 => PackedInt32Array, MockValue::Other(VariantType::PackedInt32Array);
    construct_packed_string => PackedStringArray, MockValue::Other(VariantType::PackedStringArray);
}
