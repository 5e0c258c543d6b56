//! Plain-data math types with the engine's memory layout.
//!
//! These cross the boundary by value, so each is `#[repr(C)]` and [`Pod`].

use bytemuck::{Pod, Zeroable};

/// Floating point type used by engine math types.
#[cfg(not(feature = "double-precision"))]
pub type Real = f32;
#[cfg(feature = "double-precision")]
pub type Real = f64;

macro_rules! math_struct {
    ($($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? })*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            #[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
            pub struct $name {
                $(pub $field: $ty,)*
            }

            impl $name {
                pub const fn new($($field: $ty),*) -> Self {
                    Self { $($field),* }
                }
            }
        )*
    };
}

math_struct! {
    Vector2 { x: Real, y: Real }
    Vector2i { x: i32, y: i32 }
    Vector3 { x: Real, y: Real, z: Real }
    Vector3i { x: i32, y: i32, z: i32 }
    Vector4 { x: Real, y: Real, z: Real, w: Real }
    Vector4i { x: i32, y: i32, z: i32, w: i32 }
    Rect2 { position: Vector2, size: Vector2 }
    Rect2i { position: Vector2i, size: Vector2i }
    Quaternion { x: Real, y: Real, z: Real, w: Real }
    Plane { normal: Vector3, d: Real }
    /// Color channels are always single precision.
    Color { r: f32, g: f32, b: f32, a: f32 }
    Aabb { position: Vector3, size: Vector3 }
    /// Row-major 3x3 matrix.
    Basis { rows: [Vector3; 3] }
    Transform2D { columns: [Vector2; 3] }
    Transform3D { basis: Basis, origin: Vector3 }
    Projection { columns: [Vector4; 4] }
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
}

impl Basis {
    pub const IDENTITY: Basis = Basis::new([
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ]);
}

impl Transform3D {
    pub const IDENTITY: Transform3D = Transform3D::new(Basis::IDENTITY, Vector3::ZERO);
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    const R: usize = size_of::<Real>();

    #[test]
    fn layouts_match_engine() {
        assert_eq!(size_of::<Vector2>(), 2 * R);
        assert_eq!(size_of::<Vector3i>(), 12);
        assert_eq!(size_of::<Rect2>(), 4 * R);
        assert_eq!(size_of::<Plane>(), 4 * R);
        assert_eq!(size_of::<Color>(), 16);
        assert_eq!(size_of::<Basis>(), 9 * R);
        assert_eq!(size_of::<Transform2D>(), 6 * R);
        assert_eq!(size_of::<Transform3D>(), 12 * R);
        assert_eq!(size_of::<Projection>(), 16 * R);
    }

    #[test]
    fn identity_transform() {
        let t = Transform3D::IDENTITY;
        assert_eq!(t.basis.rows[1].y, 1.0);
        assert_eq!(t.origin, Vector3::ZERO);
    }

    #[test]
    fn bytes_are_plain() {
        let v = Vector3i::new(1, -2, 3);
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytemuck::pod_read_unaligned::<Vector3i>(bytes), v);
    }
}
