//! Error types for the engine bridge.

use thiserror::Error;

use crate::abi::{CallError, CallErrorKind};
use crate::variant_type::VariantType;

/// Errors that can occur when decoding values that crossed the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The engine passed a null pointer where a value was expected
    #[error("null argument at index {index}")]
    NullArgument { index: usize },

    /// Argument index beyond the declared argument count
    #[error("argument index {index} out of bounds (call has {count} arguments)")]
    ArgumentIndexOutOfBounds { index: usize, count: usize },

    /// Attempted to treat a null handle as a live value
    #[error("null handle cannot be converted to {target_type}")]
    NullHandle { target_type: &'static str },

    /// Value type differs from the declared type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: VariantType,
        actual: VariantType,
    },

    /// Return slot read after a later reservation replaced it
    #[error("return slot {slot} was replaced by reservation {current}")]
    StaleReturnSlot { slot: u32, current: u32 },

    /// Invalid UTF-8 in string
    #[error("invalid UTF-8 string data")]
    InvalidUtf8,

    /// Generic conversion failure
    #[error("conversion failed: {message}")]
    Failed { message: String },
}

/// Errors raised by host code running on behalf of the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// Error converting arguments or return values
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Instance handle no longer refers to a live host instance
    #[error("stale instance handle: slot {index} has been freed")]
    StaleInstance { index: u32 },

    /// Host instance is already borrowed by an outer call
    #[error("instance of {class} is already in use")]
    Reentrant { class: &'static str },

    /// Host code panicked
    #[error("host code panicked: {message}")]
    Panic { message: String },

    /// Generic host error
    #[error("native error: {message}")]
    Other { message: String },
}

impl NativeError {
    /// Create a generic native error.
    pub fn other(message: impl Into<String>) -> Self {
        NativeError::Other {
            message: message.into(),
        }
    }

    /// Build a panic error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        NativeError::Panic { message }
    }

    /// The native call error record describing this failure.
    pub fn call_error(&self) -> CallError {
        let (kind, argument, expected) = match self {
            NativeError::Conversion(ConversionError::NullArgument { index }) => {
                (CallErrorKind::InvalidArgument, *index as i32, 0)
            }
            NativeError::Conversion(ConversionError::ArgumentIndexOutOfBounds { count, .. }) => {
                (CallErrorKind::TooFewArguments, 0, *count as i32)
            }
            NativeError::Conversion(ConversionError::TypeMismatch { expected, .. }) => {
                (CallErrorKind::InvalidArgument, 0, *expected as i32)
            }
            NativeError::StaleInstance { .. } => (CallErrorKind::InstanceIsNil, 0, 0),
            _ => (CallErrorKind::InvalidMethod, 0, 0),
        };
        CallError {
            error: kind as i32,
            argument,
            expected,
        }
    }
}

/// Errors surfaced by the bridge itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A required entry point was not provided by the engine
    #[error("engine does not provide entry point '{name}'")]
    MissingProc { name: String },

    /// The engine does not know the class
    #[error("unknown class '{class}'")]
    UnknownClass { class: String },

    /// The engine has no method bind matching name and hash
    #[error("unknown method {class}::{method} (hash {hash})")]
    UnknownMethod {
        class: String,
        method: String,
        hash: i64,
    },

    /// The engine has no singleton with that name
    #[error("unknown singleton '{name}'")]
    UnknownSingleton { name: String },

    /// A virtual handler names a method the parent class does not declare
    #[error("'{method}' is not a virtual method of {parent} (registering {class})")]
    UnknownVirtual {
        class: String,
        parent: String,
        method: String,
    },

    /// Class registered twice
    #[error("class '{class}' is already registered")]
    DuplicateClass { class: String },

    /// Class was never registered or has already been unregistered
    #[error("class '{class}' is not registered")]
    NotRegistered { class: String },

    /// Object pointer is null
    #[error("null object")]
    NullObject,

    /// Object has no host instance attached
    #[error("object {object:#x} has no host instance")]
    NoInstance { object: u64 },

    /// Object behind the handle has been destroyed
    #[error("object with instance id {instance_id} has been freed")]
    Invalidated { instance_id: u64 },

    /// The registry released or ended the handle behind a live wrapper
    #[error("{type_name} handle was already released")]
    Released { type_name: &'static str },

    /// The handle already has a live owner
    #[error("handle {words:?} already has an owner")]
    AlreadyOwned { words: Vec<u64> },

    /// Engine does not provide a constructor or destructor for the type
    #[error("no {operation} for {variant_type}")]
    MissingTypeOperation {
        operation: &'static str,
        variant_type: VariantType,
    },

    /// Decoding failure while talking to the engine
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Failure inside host code
    #[error("{0}")]
    Native(#[from] NativeError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_error_null_argument() {
        let err = ConversionError::NullArgument { index: 2 };
        assert!(err.to_string().contains("null argument"));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn conversion_error_out_of_bounds() {
        let err = ConversionError::ArgumentIndexOutOfBounds { index: 5, count: 3 };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn conversion_error_type_mismatch() {
        let err = ConversionError::TypeMismatch {
            expected: VariantType::Int,
            actual: VariantType::String,
        };
        assert!(err.to_string().contains("type mismatch"));
        assert!(err.to_string().contains("int"));
        assert!(err.to_string().contains("String"));
    }

    #[test]
    fn conversion_error_null_handle() {
        let err = ConversionError::NullHandle {
            target_type: "Node",
        };
        assert!(err.to_string().contains("null handle"));
        assert!(err.to_string().contains("Node"));
    }

    #[test]
    fn conversion_error_stale_return_slot() {
        let err = ConversionError::StaleReturnSlot { slot: 1, current: 2 };
        assert!(err.to_string().contains("replaced"));
    }

    #[test]
    fn conversion_error_invalid_utf8() {
        assert!(ConversionError::InvalidUtf8.to_string().contains("UTF-8"));
    }

    #[test]
    fn native_error_from_conversion() {
        let native_err: NativeError = ConversionError::InvalidUtf8.into();
        assert!(matches!(native_err, NativeError::Conversion(_)));
    }

    #[test]
    fn native_error_from_panic_payloads() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(42u8);

        assert_eq!(
            NativeError::from_panic(static_payload.as_ref()),
            NativeError::Panic {
                message: "boom".into()
            }
        );
        assert!(
            NativeError::from_panic(owned_payload.as_ref())
                .to_string()
                .contains("bang")
        );
        assert!(
            NativeError::from_panic(other_payload.as_ref())
                .to_string()
                .contains("unknown panic")
        );
    }

    #[test]
    fn native_error_reentrant() {
        let err = NativeError::Reentrant { class: "Player" };
        assert!(err.to_string().contains("Player"));
        assert!(err.to_string().contains("in use"));
    }

    #[test]
    fn native_error_call_error_kinds() {
        let null = NativeError::from(ConversionError::NullArgument { index: 3 }).call_error();
        assert_eq!(null.kind(), Some(CallErrorKind::InvalidArgument));
        assert_eq!(null.argument, 3);

        let short = NativeError::from(ConversionError::ArgumentIndexOutOfBounds {
            index: 2,
            count: 1,
        })
        .call_error();
        assert_eq!(short.kind(), Some(CallErrorKind::TooFewArguments));
        assert_eq!(short.expected, 1);

        let stale = NativeError::StaleInstance { index: 4 }.call_error();
        assert_eq!(stale.kind(), Some(CallErrorKind::InstanceIsNil));
        assert!(!NativeError::other("x").call_error().is_ok());
    }

    #[test]
    fn native_error_other() {
        assert!(NativeError::other("generic error").to_string().contains("generic error"));
    }

    #[test]
    fn bridge_error_missing_proc() {
        let err = BridgeError::MissingProc {
            name: "object_destroy".into(),
        };
        assert!(err.to_string().contains("object_destroy"));
    }

    #[test]
    fn bridge_error_unknown_method() {
        let err = BridgeError::UnknownMethod {
            class: "Node".into(),
            method: "add_child".into(),
            hash: 3863233950,
        };
        let text = err.to_string();
        assert!(text.contains("Node::add_child"));
        assert!(text.contains("3863233950"));
    }

    #[test]
    fn bridge_error_unknown_virtual() {
        let err = BridgeError::UnknownVirtual {
            class: "Player".into(),
            parent: "Node".into(),
            method: "_tick".into(),
        };
        let text = err.to_string();
        assert!(text.contains("_tick"));
        assert!(text.contains("Node"));
        assert!(text.contains("Player"));
    }

    #[test]
    fn bridge_error_invalidated() {
        let err = BridgeError::Invalidated { instance_id: 77 };
        assert!(err.to_string().contains("77"));
        assert!(err.to_string().contains("freed"));
    }

    #[test]
    fn bridge_error_released() {
        let err = BridgeError::Released {
            type_name: "String",
        };
        assert!(err.to_string().contains("String"));
        assert!(err.to_string().contains("released"));
    }

    #[test]
    fn bridge_error_no_instance() {
        let err = BridgeError::NoInstance { object: 0x1000 };
        assert!(err.to_string().contains("0x1000"));
    }

    #[test]
    fn bridge_error_is_clone() {
        let err = BridgeError::DuplicateClass {
            class: "Player".into(),
        };
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn bridge_error_from_native() {
        let err: BridgeError = NativeError::other("bad").into();
        assert!(matches!(err, BridgeError::Native(_)));
        assert!(err.to_string().contains("bad"));
    }
}
