//! Marshaling and ownership layer between host code and an ABI-stable native
//! engine.
//!
//! - [`engine`]: the lazily resolved dispatch table, interned names, method
//!   binds and typed calls into the engine.
//! - [`ownership`]: wrappers that decide who releases a native handle, plus the
//!   registry that tracks them and breaks cycles.
//! - [`extension`]: host classes the engine instantiates and calls back into.
//!
//! Call frames live in `enginebridge-frame` and the shared ABI vocabulary in
//! `enginebridge-core`; the common items of both are re-exported in
//! [`prelude`].

pub mod engine;
pub mod extension;
pub mod ownership;

pub use enginebridge_core::{
    BridgeError, BridgeResult, ConversionError, EngineProperty, InitLevel, NativeError,
    Properties, VariantType, Words,
};

pub mod prelude {
    pub use crate::engine::{
        CallTarget, DispatchTable, Engine, InstanceId, MethodSpec, MethodTable,
    };
    pub use crate::extension::{
        ClassBuilder, ClassState, Dispatch, Extension, ExtensionClass, InstanceBase, ParentClass,
        VirtualCall, VirtualSignature, parents,
    };
    pub use crate::ownership::{
        Borrowed, CycleReport, Owned, PointerId, Ref, Registry, Tracked, Weak,
    };
    pub use enginebridge_core::{
        Array, BridgeError, BridgeResult, Callable, ConversionError, Dictionary, EngineProperty,
        GetProcAddress, InitLevel, NameHash, NativeError, NativeString, NativeType, NodePath,
        Object, ObjectType, PackedByteArray, PackedColorArray, PackedFloat32Array,
        PackedFloat64Array, PackedInt32Array, PackedInt64Array, PackedStringArray,
        PackedVector2Array, PackedVector3Array, PackedVector4Array, ProcLoader, Properties,
        RefCounted, RefCountedType, Signal, StringName, Variant, VariantType, Words,
    };
    pub use enginebridge_core::math::*;
    pub use enginebridge_frame::{Frame, FrameArg, FrameRet, ReturnSlot};
}
