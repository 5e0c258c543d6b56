use std::fmt;
use std::marker::PhantomData;

use enginebridge_core::{NativeType, RawHandle};

/// A native value that stays valid only while something else is alive.
///
/// The lifetime ties the handle to its owner (the enclosing call or the
/// wrapper it was borrowed from), and there is no way to release it.
pub struct Borrowed<'a, T: NativeType> {
    raw: T::Raw,
    _marker: PhantomData<(&'a (), fn() -> T)>,
}

impl<'a, T: NativeType> Borrowed<'a, T> {
    /// Borrow `raw` for as long as `bound_to` is borrowed.
    pub fn bound_to<B: ?Sized>(raw: T::Raw, _bound_to: &'a B) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `raw` must stay valid for all of `'a`.
    pub unsafe fn from_raw(raw: T::Raw) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> T::Raw {
        self.raw
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }
}

impl<T: NativeType> Clone for Borrowed<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: NativeType> Copy for Borrowed<'_, T> {}

impl<T: NativeType> PartialEq for Borrowed<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: NativeType> fmt::Debug for Borrowed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("type", &T::NAME)
            .field("raw", &self.raw)
            .finish()
    }
}
