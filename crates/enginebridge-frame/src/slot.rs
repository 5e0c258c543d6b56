//! Encoding of values into frame slots.
//!
//! Every value that crosses the boundary occupies a whole number of 64-bit
//! words. Plain-data types are copied bit for bit; handles are copied as their
//! opaque words.

use std::mem::size_of;

use enginebridge_core::{
    Aabb, Basis, Color, Plane, Projection, Quaternion, Rect2, Rect2i, Transform2D, Transform3D,
    VariantType, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i, Words,
};

/// Number of words needed to hold `size` bytes.
pub const fn words_for(size: usize) -> usize {
    size.div_ceil(8)
}

/// A value that can be written into an argument slot.
pub trait FrameArg {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write the value into `out`, which holds at least `SIZE` bytes.
    fn encode(&self, out: &mut [u8]);
}

/// A value that can be read back out of a return slot.
pub trait FrameRet: Sized {
    const SIZE: usize;

    /// Read the value from `bytes`, which holds at least `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! pod_slot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FrameArg for $ty {
                const SIZE: usize = size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out[..size_of::<$ty>()].copy_from_slice(bytemuck::bytes_of(self));
                }
            }

            impl FrameRet for $ty {
                const SIZE: usize = size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Self {
                    bytemuck::pod_read_unaligned(&bytes[..size_of::<$ty>()])
                }
            }
        )*
    };
}

pod_slot!(
    i32, u32, i64, u64, f32, f64, Vector2, Vector2i, Vector3, Vector3i, Vector4, Vector4i, Rect2,
    Rect2i, Quaternion, Plane, Color, Aabb, Basis, Transform2D, Transform3D, Projection,
);

impl<const N: usize> FrameArg for Words<N> {
    const SIZE: usize = N * 8;

    fn encode(&self, out: &mut [u8]) {
        out[..N * 8].copy_from_slice(bytemuck::bytes_of(self));
    }
}

impl<const N: usize> FrameRet for Words<N> {
    const SIZE: usize = N * 8;

    fn decode(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(&bytes[..N * 8])
    }
}

impl FrameArg for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }
}

impl FrameRet for bool {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl FrameArg for () {
    const SIZE: usize = 0;

    fn encode(&self, _out: &mut [u8]) {}
}

impl FrameRet for () {
    const SIZE: usize = 0;

    fn decode(_bytes: &[u8]) -> Self {}
}

/// Size of the return slot a call reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// The call returns nothing.
    None,
    /// The call writes this many bytes.
    Bytes(usize),
}

impl ReturnKind {
    pub const fn of<R: FrameRet>() -> Self {
        if R::SIZE == 0 {
            ReturnKind::None
        } else {
            ReturnKind::Bytes(R::SIZE)
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            ReturnKind::None => 0,
            ReturnKind::Bytes(n) => n,
        }
    }

    pub const fn words(self) -> usize {
        words_for(self.bytes())
    }

    /// Return slot for a value of the given engine type.
    pub const fn for_variant_type(variant_type: VariantType) -> Self {
        if let Some(words) = variant_type.handle_words() {
            return ReturnKind::Bytes(words * 8);
        }
        let size = match variant_type {
            VariantType::Bool => 1,
            VariantType::Int | VariantType::Float | VariantType::Rid => 8,
            VariantType::Vector2 => size_of::<Vector2>(),
            VariantType::Vector2i => size_of::<Vector2i>(),
            VariantType::Rect2 => size_of::<Rect2>(),
            VariantType::Rect2i => size_of::<Rect2i>(),
            VariantType::Vector3 => size_of::<Vector3>(),
            VariantType::Vector3i => size_of::<Vector3i>(),
            VariantType::Transform2D => size_of::<Transform2D>(),
            VariantType::Vector4 => size_of::<Vector4>(),
            VariantType::Vector4i => size_of::<Vector4i>(),
            VariantType::Plane => size_of::<Plane>(),
            VariantType::Quaternion => size_of::<Quaternion>(),
            VariantType::Aabb => size_of::<Aabb>(),
            VariantType::Basis => size_of::<Basis>(),
            VariantType::Transform3D => size_of::<Transform3D>(),
            VariantType::Projection => size_of::<Projection>(),
            VariantType::Color => size_of::<Color>(),
            _ => 0,
        };
        ReturnKind::Bytes(size)
    }
}
