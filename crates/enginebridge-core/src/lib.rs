//! Shared vocabulary of the engine bridge.
//!
//! This crate holds everything both sides of the boundary agree on: the C ABI
//! signatures, opaque handle storage, engine value type codes, the plain-data
//! math types, name hashing, error types and tunable properties. It performs no
//! calls into the engine itself.

pub mod abi;
pub mod error;
pub mod handle;
pub mod loader;
pub mod math;
pub mod name_hash;
pub mod properties;
pub mod variant_type;

pub use abi::{
    Bool, CallError, CallErrorKind, ClassCreationInfo, ConstPtr, InitLevel, InstancePtr,
    MethodBindPtr, ObjectPtr, RawProc,
};
pub use error::{BridgeError, BridgeResult, ConversionError, NativeError};
pub use handle::{
    Array, Callable, Dictionary, NativeString, NativeType, NodePath, Object, ObjectType,
    PackedByteArray, PackedColorArray, PackedFloat32Array, PackedFloat64Array, PackedInt32Array,
    PackedInt64Array, PackedStringArray, PackedVector2Array, PackedVector3Array,
    PackedVector4Array, RawHandle, RefCounted, RefCountedType, ReleaseKind, Signal, StringName,
    Variant, Words,
};
pub use loader::{GetProcAddress, ProcLoader};
pub use math::*;
pub use name_hash::NameHash;
pub use properties::{EngineProperty, Properties};
pub use variant_type::VariantType;
