//! Entry points resolved from the engine's bootstrap handshake.

use std::fmt;

use enginebridge_core::abi::{self, proc_names};
use enginebridge_core::{BridgeError, BridgeResult, ProcLoader, RawProc};
use tracing::{debug, error};

/// Native function pointers, resolved once per [`Engine`](super::Engine).
///
/// The table is immutable once built; every field is a plain function
/// pointer, so it can be shared freely between threads.
pub struct DispatchTable {
    pub(crate) object_method_bind_ptrcall: abi::ObjectMethodBindPtrcallFn,
    pub(crate) classdb_get_method_bind: abi::ClassdbGetMethodBindFn,
    pub(crate) classdb_construct_object: abi::ClassdbConstructObjectFn,
    pub(crate) classdb_register_extension_class: abi::ClassdbRegisterExtensionClassFn,
    pub(crate) classdb_unregister_extension_class: abi::ClassdbUnregisterExtensionClassFn,
    pub(crate) global_get_singleton: abi::GlobalGetSingletonFn,
    pub(crate) object_get_instance_from_id: abi::ObjectGetInstanceFromIdFn,
    pub(crate) object_get_instance_id: abi::ObjectGetInstanceIdFn,
    pub(crate) object_destroy: abi::ObjectDestroyFn,
    pub(crate) object_set_instance: abi::ObjectSetInstanceFn,
    pub(crate) string_name_new_with_utf8_chars_and_len: abi::StringNameNewWithUtf8CharsAndLenFn,
    pub(crate) string_new_with_utf8_chars_and_len: abi::StringNewWithUtf8CharsAndLenFn,
    pub(crate) string_to_utf8_chars: abi::StringToUtf8CharsFn,
    pub(crate) variant_get_ptr_destructor: abi::VariantGetPtrDestructorFn,
    pub(crate) variant_get_ptr_constructor: abi::VariantGetPtrConstructorFn,
}

impl DispatchTable {
    /// Look up every required entry point through `loader`.
    ///
    /// Each name is requested exactly once. The first missing entry point
    /// aborts resolution.
    pub(crate) fn resolve(loader: &dyn ProcLoader) -> BridgeResult<Self> {
        macro_rules! load {
            ($name:ident: $ty:ty) => {{
                let Some(raw) = loader.load(proc_names::$name) else {
                    let err = BridgeError::MissingProc {
                        name: proc_names::$name.to_string_lossy().into_owned(),
                    };
                    error!(error = %err, "engine handshake failed");
                    return Err(err);
                };
                // SAFETY: the engine publishes each entry point under the name
                // of its signature.
                unsafe { std::mem::transmute::<RawProc, $ty>(raw) }
            }};
        }

        let table = DispatchTable {
            object_method_bind_ptrcall: load!(OBJECT_METHOD_BIND_PTRCALL: abi::ObjectMethodBindPtrcallFn),
            classdb_get_method_bind: load!(CLASSDB_GET_METHOD_BIND: abi::ClassdbGetMethodBindFn),
            classdb_construct_object: load!(CLASSDB_CONSTRUCT_OBJECT: abi::ClassdbConstructObjectFn),
            classdb_register_extension_class: load!(
                CLASSDB_REGISTER_EXTENSION_CLASS: abi::ClassdbRegisterExtensionClassFn
            ),
            classdb_unregister_extension_class: load!(
                CLASSDB_UNREGISTER_EXTENSION_CLASS: abi::ClassdbUnregisterExtensionClassFn
            ),
            global_get_singleton: load!(GLOBAL_GET_SINGLETON: abi::GlobalGetSingletonFn),
            object_get_instance_from_id: load!(
                OBJECT_GET_INSTANCE_FROM_ID: abi::ObjectGetInstanceFromIdFn
            ),
            object_get_instance_id: load!(OBJECT_GET_INSTANCE_ID: abi::ObjectGetInstanceIdFn),
            object_destroy: load!(OBJECT_DESTROY: abi::ObjectDestroyFn),
            object_set_instance: load!(OBJECT_SET_INSTANCE: abi::ObjectSetInstanceFn),
            string_name_new_with_utf8_chars_and_len: load!(
                STRING_NAME_NEW_WITH_UTF8_CHARS_AND_LEN: abi::StringNameNewWithUtf8CharsAndLenFn
            ),
            string_new_with_utf8_chars_and_len: load!(
                STRING_NEW_WITH_UTF8_CHARS_AND_LEN: abi::StringNewWithUtf8CharsAndLenFn
            ),
            string_to_utf8_chars: load!(STRING_TO_UTF8_CHARS: abi::StringToUtf8CharsFn),
            variant_get_ptr_destructor: load!(
                VARIANT_GET_PTR_DESTRUCTOR: abi::VariantGetPtrDestructorFn
            ),
            variant_get_ptr_constructor: load!(
                VARIANT_GET_PTR_CONSTRUCTOR: abi::VariantGetPtrConstructorFn
            ),
        };
        debug!(entry_points = proc_names::REQUIRED.len(), "resolved dispatch table");
        Ok(table)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("entry_points", &proc_names::REQUIRED.len())
            .finish_non_exhaustive()
    }
}
