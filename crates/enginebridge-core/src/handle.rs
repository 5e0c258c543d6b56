//! Opaque native handles and the marker types that describe them.
//!
//! A handle is a fixed number of 64-bit words whose contents only the engine
//! understands. The bridge copies handles by value, never dereferences them, and
//! decides from the marker type how a handle is released.

use std::ffi::c_void;
use std::fmt;
use std::hash::Hash;

use bytemuck::{Pod, Zeroable};

use crate::abi::{ConstPtr, ObjectPtr};
use crate::variant_type::VariantType;

/// `N` machine words of opaque native state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Words<const N: usize>(pub [u64; N]);

// SAFETY: a transparent array of u64 has no padding and every bit pattern is valid.
unsafe impl<const N: usize> Zeroable for Words<N> {}
unsafe impl<const N: usize> Pod for Words<N> {}

impl<const N: usize> Words<N> {
    pub const NULL: Self = Self([0; N]);

    pub const fn new(words: [u64; N]) -> Self {
        Self(words)
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Pointer to the handle storage, as passed to ptrcall arguments.
    pub fn as_ptr(&self) -> ConstPtr {
        self.0.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr().cast()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Copy a handle out of a word slice, zero-filling missing words.
    pub fn from_slice(words: &[u64]) -> Self {
        let mut out = [0; N];
        let len = words.len().min(N);
        out[..len].copy_from_slice(&words[..len]);
        Self(out)
    }
}

impl Words<1> {
    /// Wrap an object pointer.
    pub fn from_object(ptr: ObjectPtr) -> Self {
        Self([ptr as usize as u64])
    }

    /// The wrapped object pointer.
    pub fn object(&self) -> ObjectPtr {
        self.0[0] as usize as ObjectPtr
    }
}

impl<const N: usize> Default for Words<N> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<const N: usize> fmt::Debug for Words<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Words[")?;
        for (i, word) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:#x}", word)?;
        }
        write!(f, "]")
    }
}

/// Storage of a native handle.
pub trait RawHandle: Copy + Eq + Hash + fmt::Debug + Pod + 'static {
    const WORDS: usize;

    fn words(&self) -> &[u64];

    fn from_words(words: &[u64]) -> Self;

    fn is_null(&self) -> bool {
        self.words().iter().all(|word| *word == 0)
    }
}

impl<const N: usize> RawHandle for Words<N> {
    const WORDS: usize = N;

    fn words(&self) -> &[u64] {
        &self.0
    }

    fn from_words(words: &[u64]) -> Self {
        Words::from_slice(words)
    }
}

/// How the native side reclaims a handle once its owner lets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseKind {
    /// Call the variant destructor for the handle's type.
    Destructor,
    /// Destroy the object outright.
    Destroy,
    /// Drop one reference; destroy when the count reaches zero.
    Unreference,
}

/// A native type the bridge can hold a handle to.
pub trait NativeType: 'static {
    const NAME: &'static str;
    const VARIANT_TYPE: VariantType;
    const RELEASE: ReleaseKind;
    type Raw: RawHandle;
}

/// Native object classes.
pub trait ObjectType: NativeType<Raw = Words<1>> {
    const CLASS_NAME: &'static str;
}

/// Object classes whose lifetime is governed by a native reference count.
pub trait RefCountedType: ObjectType {}

macro_rules! value_types {
    ($($(#[$meta:meta])* $name:ident => $variant:ident, $words:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $name {}

            impl NativeType for $name {
                const NAME: &'static str = VariantType::$variant.name();
                const VARIANT_TYPE: VariantType = VariantType::$variant;
                const RELEASE: ReleaseKind = ReleaseKind::Destructor;
                type Raw = Words<$words>;
            }
        )*
    };
}

value_types! {
    /// Engine string.
    NativeString => String, 1;
    /// Interned engine string.
    StringName => StringName, 1;
    NodePath => NodePath, 1;
    Array => Array, 1;
    Dictionary => Dictionary, 1;
    Callable => Callable, 2;
    Signal => Signal, 2;
    /// Tagged union of every engine value.
    Variant => Nil, 3;
    PackedByteArray => PackedByteArray, 2;
    PackedInt32Array => PackedInt32Array, 2;
    PackedInt64Array => PackedInt64Array, 2;
    PackedFloat32Array => PackedFloat32Array, 2;
    PackedFloat64Array => PackedFloat64Array, 2;
    PackedStringArray => PackedStringArray, 2;
    PackedVector2Array => PackedVector2Array, 2;
    PackedVector3Array => PackedVector3Array, 2;
    PackedColorArray => PackedColorArray, 2;
    PackedVector4Array => PackedVector4Array, 2;
}

/// Root of the native class hierarchy.
#[derive(Debug)]
pub enum Object {}

impl NativeType for Object {
    const NAME: &'static str = "Object";
    const VARIANT_TYPE: VariantType = VariantType::Object;
    const RELEASE: ReleaseKind = ReleaseKind::Destroy;
    type Raw = Words<1>;
}

impl ObjectType for Object {
    const CLASS_NAME: &'static str = "Object";
}

/// Base of every reference-counted class.
#[derive(Debug)]
pub enum RefCounted {}

impl NativeType for RefCounted {
    const NAME: &'static str = "RefCounted";
    const VARIANT_TYPE: VariantType = VariantType::Object;
    const RELEASE: ReleaseKind = ReleaseKind::Unreference;
    type Raw = Words<1>;
}

impl ObjectType for RefCounted {
    const CLASS_NAME: &'static str = "RefCounted";
}

impl RefCountedType for RefCounted {}

/// Declare a marker for a native class.
///
/// ```
/// enginebridge_core::object_class!(Node, "Node");
/// enginebridge_core::object_class!(Resource, "Resource", ref_counted);
/// ```
#[macro_export]
macro_rules! object_class {
    ($name:ident, $class:literal) => {
        #[derive(Debug)]
        pub enum $name {}

        impl $crate::NativeType for $name {
            const NAME: &'static str = $class;
            const VARIANT_TYPE: $crate::VariantType = $crate::VariantType::Object;
            const RELEASE: $crate::ReleaseKind = $crate::ReleaseKind::Destroy;
            type Raw = $crate::Words<1>;
        }

        impl $crate::ObjectType for $name {
            const CLASS_NAME: &'static str = $class;
        }
    };
    ($name:ident, $class:literal, ref_counted) => {
        #[derive(Debug)]
        pub enum $name {}

        impl $crate::NativeType for $name {
            const NAME: &'static str = $class;
            const VARIANT_TYPE: $crate::VariantType = $crate::VariantType::Object;
            const RELEASE: $crate::ReleaseKind = $crate::ReleaseKind::Unreference;
            type Raw = $crate::Words<1>;
        }

        impl $crate::ObjectType for $name {
            const CLASS_NAME: &'static str = $class;
        }

        impl $crate::RefCountedType for $name {}
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_null_and_default() {
        assert!(Words::<3>::NULL.is_null());
        assert!(Words::<2>::default().is_null());
        assert!(!Words::new([0, 1]).is_null());
    }

    #[test]
    fn words_from_short_slice_zero_fills() {
        let words = Words::<3>::from_slice(&[7]);
        assert_eq!(words.0, [7, 0, 0]);
    }

    #[test]
    fn words_debug_is_hex() {
        let words = Words::new([0x10, 0xff]);
        assert_eq!(format!("{:?}", words), "Words[0x10, 0xff]");
    }

    #[test]
    fn object_pointer_round_trip() {
        let ptr = 0x1234usize as ObjectPtr;
        assert_eq!(Words::from_object(ptr).object(), ptr);
    }

    #[test]
    fn marker_widths_match_variant_type() {
        fn width<T: NativeType>() -> usize {
            <T::Raw as RawHandle>::WORDS
        }
        assert_eq!(Some(width::<NativeString>()), VariantType::String.handle_words());
        assert_eq!(Some(width::<Callable>()), VariantType::Callable.handle_words());
        assert_eq!(Some(width::<Variant>()), VariantType::Nil.handle_words());
        assert_eq!(
            Some(width::<PackedStringArray>()),
            VariantType::PackedStringArray.handle_words()
        );
    }

    #[test]
    fn release_kinds() {
        assert_eq!(Array::RELEASE, ReleaseKind::Destructor);
        assert_eq!(Object::RELEASE, ReleaseKind::Destroy);
        assert_eq!(RefCounted::RELEASE, ReleaseKind::Unreference);
    }

    crate::object_class!(Node, "Node");
    crate::object_class!(Resource, "Resource", ref_counted);

    #[test]
    fn declared_classes() {
        assert_eq!(Node::CLASS_NAME, "Node");
        assert_eq!(Node::RELEASE, ReleaseKind::Destroy);
        assert_eq!(Resource::RELEASE, ReleaseKind::Unreference);
    }
}
