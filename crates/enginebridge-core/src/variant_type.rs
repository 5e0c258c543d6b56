//! Engine value type codes.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Type tag of every value the engine can store in a variant.
///
/// The numeric codes are part of the ABI and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    /// Number of 64-bit words an opaque handle of this type occupies, or `None`
    /// for plain-data types that are passed by value.
    pub const fn handle_words(self) -> Option<usize> {
        match self {
            VariantType::String
            | VariantType::StringName
            | VariantType::NodePath
            | VariantType::Object
            | VariantType::Dictionary
            | VariantType::Array => Some(1),
            VariantType::Callable | VariantType::Signal => Some(2),
            VariantType::Nil => Some(3),
            _ if self.is_packed_array() => Some(2),
            _ => None,
        }
    }

    pub const fn is_packed_array(self) -> bool {
        (self as u32) >= VariantType::PackedByteArray as u32
            && (self as u32) <= VariantType::PackedVector4Array as u32
    }

    /// Whether values of this type own native memory that must be released
    /// through the variant destructor.
    pub const fn needs_destructor(self) -> bool {
        matches!(
            self,
            VariantType::String
                | VariantType::StringName
                | VariantType::NodePath
                | VariantType::Callable
                | VariantType::Signal
                | VariantType::Dictionary
                | VariantType::Array
        ) || self.is_packed_array()
    }

    pub const fn name(self) -> &'static str {
        match self {
            VariantType::Nil => "Variant",
            VariantType::Bool => "bool",
            VariantType::Int => "int",
            VariantType::Float => "float",
            VariantType::String => "String",
            VariantType::Vector2 => "Vector2",
            VariantType::Vector2i => "Vector2i",
            VariantType::Rect2 => "Rect2",
            VariantType::Rect2i => "Rect2i",
            VariantType::Vector3 => "Vector3",
            VariantType::Vector3i => "Vector3i",
            VariantType::Transform2D => "Transform2D",
            VariantType::Vector4 => "Vector4",
            VariantType::Vector4i => "Vector4i",
            VariantType::Plane => "Plane",
            VariantType::Quaternion => "Quaternion",
            VariantType::Aabb => "AABB",
            VariantType::Basis => "Basis",
            VariantType::Transform3D => "Transform3D",
            VariantType::Projection => "Projection",
            VariantType::Color => "Color",
            VariantType::StringName => "StringName",
            VariantType::NodePath => "NodePath",
            VariantType::Rid => "RID",
            VariantType::Object => "Object",
            VariantType::Callable => "Callable",
            VariantType::Signal => "Signal",
            VariantType::Dictionary => "Dictionary",
            VariantType::Array => "Array",
            VariantType::PackedByteArray => "PackedByteArray",
            VariantType::PackedInt32Array => "PackedInt32Array",
            VariantType::PackedInt64Array => "PackedInt64Array",
            VariantType::PackedFloat32Array => "PackedFloat32Array",
            VariantType::PackedFloat64Array => "PackedFloat64Array",
            VariantType::PackedStringArray => "PackedStringArray",
            VariantType::PackedVector2Array => "PackedVector2Array",
            VariantType::PackedVector3Array => "PackedVector3Array",
            VariantType::PackedColorArray => "PackedColorArray",
            VariantType::PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(u32::from(VariantType::StringName), 21);
        assert_eq!(u32::from(VariantType::Object), 24);
        assert_eq!(u32::from(VariantType::Array), 28);
        assert_eq!(u32::from(VariantType::PackedVector4Array), 38);
        assert_eq!(VariantType::try_from(27u32).ok(), Some(VariantType::Dictionary));
        assert!(VariantType::try_from(39u32).is_err());
    }

    #[test]
    fn handle_widths() {
        assert_eq!(VariantType::String.handle_words(), Some(1));
        assert_eq!(VariantType::Object.handle_words(), Some(1));
        assert_eq!(VariantType::Callable.handle_words(), Some(2));
        assert_eq!(VariantType::PackedInt32Array.handle_words(), Some(2));
        assert_eq!(VariantType::Nil.handle_words(), Some(3));
        assert_eq!(VariantType::Vector3.handle_words(), None);
    }

    #[test]
    fn destructor_requirements() {
        assert!(VariantType::String.needs_destructor());
        assert!(VariantType::PackedColorArray.needs_destructor());
        assert!(!VariantType::Object.needs_destructor());
        assert!(!VariantType::Float.needs_destructor());
    }

    #[test]
    fn display_uses_engine_name() {
        assert_eq!(VariantType::Aabb.to_string(), "AABB");
        assert_eq!(VariantType::Nil.to_string(), "Variant");
    }
}
