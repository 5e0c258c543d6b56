//! C ABI shared with the native engine.
//!
//! Every entry point the bridge calls is a plain C function pointer looked up by
//! name through [`GetProcAddressFn`]. Pointer parameters follow the ptrcall
//! convention: a value of a built-in or handle type is passed as a pointer to its
//! storage, an object is passed as a pointer to the object pointer.

use std::ffi::{CStr, c_char, c_void};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Mutable pointer to a native object.
pub type ObjectPtr = *mut c_void;
/// Read-only pointer to native value storage.
pub type ConstPtr = *const c_void;
/// Resolved method bind, opaque to the bridge.
pub type MethodBindPtr = *const c_void;
/// Host instance pointer handed to the native side for extension objects.
pub type InstancePtr = *mut c_void;
/// Boolean as it crosses the boundary.
pub type Bool = u8;

/// Untyped entry point returned by the proc loader.
pub type RawProc = unsafe extern "C" fn();
/// Symbol resolver supplied by the engine at load time.
pub type GetProcAddressFn = unsafe extern "C" fn(name: *const c_char) -> Option<RawProc>;

pub type ObjectMethodBindPtrcallFn = unsafe extern "C" fn(
    method: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstPtr,
    ret: *mut c_void,
);
pub type ClassdbGetMethodBindFn =
    unsafe extern "C" fn(class: ConstPtr, method: ConstPtr, hash: i64) -> MethodBindPtr;
pub type ClassdbConstructObjectFn = unsafe extern "C" fn(class: ConstPtr) -> ObjectPtr;
pub type GlobalGetSingletonFn = unsafe extern "C" fn(name: ConstPtr) -> ObjectPtr;
pub type ObjectGetInstanceFromIdFn = unsafe extern "C" fn(instance_id: u64) -> ObjectPtr;
pub type ObjectGetInstanceIdFn = unsafe extern "C" fn(object: ConstPtr) -> u64;
pub type ObjectDestroyFn = unsafe extern "C" fn(object: ObjectPtr);
pub type ObjectSetInstanceFn =
    unsafe extern "C" fn(object: ObjectPtr, class: ConstPtr, instance: InstancePtr);
pub type StringNameNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(dst: *mut c_void, chars: *const c_char, len: i64);
pub type StringNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(dst: *mut c_void, chars: *const c_char, len: i64);
/// Copies at most `max` bytes into `buf` and returns the full length in bytes.
pub type StringToUtf8CharsFn =
    unsafe extern "C" fn(string: ConstPtr, buf: *mut c_char, max: i64) -> i64;
pub type PtrDestructorFn = unsafe extern "C" fn(value: *mut c_void);
pub type PtrConstructorFn = unsafe extern "C" fn(dst: *mut c_void, args: *const ConstPtr);
pub type VariantGetPtrDestructorFn =
    unsafe extern "C" fn(variant_type: u32) -> Option<PtrDestructorFn>;
pub type VariantGetPtrConstructorFn =
    unsafe extern "C" fn(variant_type: u32, constructor: i32) -> Option<PtrConstructorFn>;
pub type ClassdbRegisterExtensionClassFn = unsafe extern "C" fn(
    library: *mut c_void,
    class: ConstPtr,
    parent: ConstPtr,
    info: *const ClassCreationInfo,
);
pub type ClassdbUnregisterExtensionClassFn =
    unsafe extern "C" fn(library: *mut c_void, class: ConstPtr);

// Callbacks the native engine invokes on extension classes.

pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type FreeInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void, instance: InstancePtr);
pub type GetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstPtr) -> *mut c_void;
pub type CallVirtualWithDataFn = unsafe extern "C" fn(
    instance: InstancePtr,
    name: ConstPtr,
    virtual_data: *mut c_void,
    args: *const ConstPtr,
    ret: *mut c_void,
);
pub type ReferenceFn = unsafe extern "C" fn(instance: InstancePtr);

/// Registration record for an extension class.
///
/// The native side copies this struct during registration; `class_userdata` is
/// handed back unchanged to every callback.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub is_exposed: Bool,
    pub create_instance: Option<CreateInstanceFn>,
    pub free_instance: Option<FreeInstanceFn>,
    pub get_virtual_call_data: Option<GetVirtualCallDataFn>,
    pub call_virtual_with_data: Option<CallVirtualWithDataFn>,
    pub reference: Option<ReferenceFn>,
    pub unreference: Option<ReferenceFn>,
    pub class_userdata: *mut c_void,
}

/// Outcome record written by variant-style calls.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallError {
    pub error: i32,
    pub argument: i32,
    pub expected: i32,
}

impl CallError {
    pub fn kind(&self) -> Option<CallErrorKind> {
        CallErrorKind::try_from(self.error).ok()
    }

    pub fn is_ok(&self) -> bool {
        self.error == CallErrorKind::Ok as i32
    }
}

/// Call failure categories reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum CallErrorKind {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNil = 5,
    MethodNotConst = 6,
}

/// Engine initialization stages, in the order the engine enters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl InitLevel {
    pub const ALL: [InitLevel; 4] = [
        InitLevel::Core,
        InitLevel::Servers,
        InitLevel::Scene,
        InitLevel::Editor,
    ];
}

/// Entry point names resolved into the dispatch table.
pub mod proc_names {
    use super::CStr;

    pub const OBJECT_METHOD_BIND_PTRCALL: &CStr = c"object_method_bind_ptrcall";
    pub const CLASSDB_GET_METHOD_BIND: &CStr = c"classdb_get_method_bind";
    pub const CLASSDB_CONSTRUCT_OBJECT: &CStr = c"classdb_construct_object";
    pub const CLASSDB_REGISTER_EXTENSION_CLASS: &CStr = c"classdb_register_extension_class";
    pub const CLASSDB_UNREGISTER_EXTENSION_CLASS: &CStr = c"classdb_unregister_extension_class";
    pub const GLOBAL_GET_SINGLETON: &CStr = c"global_get_singleton";
    pub const OBJECT_GET_INSTANCE_FROM_ID: &CStr = c"object_get_instance_from_id";
    pub const OBJECT_GET_INSTANCE_ID: &CStr = c"object_get_instance_id";
    pub const OBJECT_DESTROY: &CStr = c"object_destroy";
    pub const OBJECT_SET_INSTANCE: &CStr = c"object_set_instance";
    pub const STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN: &CStr =
        c"string_name_new_with_utf8_chars_and_len";
    pub const STRING_NEW_WITH_UTF8_CHARS_AND_LEN: &CStr = c"string_new_with_utf8_chars_and_len";
    pub const STRING_TO_UTF8_CHARS: &CStr = c"string_to_utf8_chars";
    pub const VARIANT_GET_PTR_DESTRUCTOR: &CStr = c"variant_get_ptr_destructor";
    pub const VARIANT_GET_PTR_CONSTRUCTOR: &CStr = c"variant_get_ptr_constructor";

    /// Every name the dispatch table requires.
    pub const REQUIRED: &[&CStr] = &[
        OBJECT_METHOD_BIND_PTRCALL,
        CLASSDB_GET_METHOD_BIND,
        CLASSDB_CONSTRUCT_OBJECT,
        CLASSDB_REGISTER_EXTENSION_CLASS,
        CLASSDB_UNREGISTER_EXTENSION_CLASS,
        GLOBAL_GET_SINGLETON,
        OBJECT_GET_INSTANCE_FROM_ID,
        OBJECT_GET_INSTANCE_ID,
        OBJECT_DESTROY,
        OBJECT_SET_INSTANCE,
        STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN,
        STRING_NEW_WITH_UTF8_CHARS_AND_LEN,
        STRING_TO_UTF8_CHARS,
        VARIANT_GET_PTR_DESTRUCTOR,
        VARIANT_GET_PTR_CONSTRUCTOR,
    ];
}

/// Method bind hashes for the reference-counting entry points on `RefCounted`.
pub mod ref_counted_hashes {
    pub const INIT_REF: i64 = 2240911060;
    pub const REFERENCE: i64 = 2240911060;
    pub const UNREFERENCE: i64 = 2240911060;
    pub const GET_REFERENCE_COUNT: i64 = 3905245786;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_kind_from_raw() {
        let err = CallError {
            error: 4,
            argument: 1,
            expected: 3,
        };
        assert_eq!(err.kind(), Some(CallErrorKind::TooFewArguments));
        assert!(!err.is_ok());
        assert!(CallError::default().is_ok());
    }

    #[test]
    fn call_error_unknown_code() {
        let err = CallError {
            error: 99,
            argument: 0,
            expected: 0,
        };
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn init_levels_ordered() {
        assert!(InitLevel::Core < InitLevel::Servers);
        assert!(InitLevel::Scene < InitLevel::Editor);
        assert_eq!(InitLevel::try_from(2u32).ok(), Some(InitLevel::Scene));
        assert!(InitLevel::try_from(7u32).is_err());
    }

    #[test]
    fn required_names_are_unique() {
        let mut names: Vec<_> = proc_names::REQUIRED.iter().collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), proc_names::REQUIRED.len());
    }
}
