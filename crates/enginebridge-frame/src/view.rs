//! Views over argument and return storage owned by the engine.
//!
//! Used on the inbound path, when the engine calls into host code and owns the
//! memory behind every pointer for the duration of the call.

use std::ffi::c_void;
use std::marker::PhantomData;

use enginebridge_core::ConversionError;
use enginebridge_core::abi::ConstPtr;

use crate::slot::{FrameArg, FrameRet, ReturnKind};

/// Read-only access to the arguments of an inbound call.
#[derive(Clone, Copy)]
pub struct ArgsView<'call> {
    args: *const ConstPtr,
    count: usize,
    _call: PhantomData<&'call ()>,
}

impl<'call> ArgsView<'call> {
    /// # Safety
    ///
    /// `args` must be null with `count == 0`, or point to `count` pointers
    /// that each reference a valid value for the whole of `'call`.
    pub unsafe fn from_raw(args: *const ConstPtr, count: usize) -> Self {
        Self {
            args,
            count: if args.is_null() { 0 } else { count },
            _call: PhantomData,
        }
    }

    pub fn empty() -> Self {
        Self {
            args: std::ptr::null(),
            count: 0,
            _call: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The pointer the engine passed for argument `index`.
    pub fn raw(&self, index: usize) -> Result<ConstPtr, ConversionError> {
        if index >= self.count {
            return Err(ConversionError::ArgumentIndexOutOfBounds {
                index,
                count: self.count,
            });
        }
        // SAFETY: index is in bounds of the array described in `from_raw`.
        let ptr = unsafe { *self.args.add(index) };
        if ptr.is_null() {
            return Err(ConversionError::NullArgument { index });
        }
        Ok(ptr)
    }

    /// Decode argument `index` as `T`.
    pub fn get<T: FrameRet>(&self, index: usize) -> Result<T, ConversionError> {
        let ptr = self.raw(index)?;
        // SAFETY: the engine guarantees the pointer references a value of the
        // declared argument type, which is at least `T::SIZE` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), T::SIZE) };
        Ok(T::decode(bytes))
    }
}

impl std::fmt::Debug for ArgsView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgsView").field("count", &self.count).finish()
    }
}

/// Write access to the return slot of an inbound call.
pub struct ReturnView<'call> {
    ret: *mut c_void,
    kind: ReturnKind,
    written: bool,
    _call: PhantomData<&'call mut ()>,
}

impl<'call> ReturnView<'call> {
    /// # Safety
    ///
    /// `ret` must be null or point to writable storage of at least
    /// `kind.bytes()` bytes for the whole of `'call`.
    pub unsafe fn from_raw(ret: *mut c_void, kind: ReturnKind) -> Self {
        Self {
            ret,
            kind: if ret.is_null() { ReturnKind::None } else { kind },
            written: false,
            _call: PhantomData,
        }
    }

    pub fn kind(&self) -> ReturnKind {
        self.kind
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Encode `value` into the return slot.
    pub fn write<T: FrameArg>(&mut self, value: T) -> Result<(), ConversionError> {
        let capacity = self.kind.bytes();
        if T::SIZE > capacity {
            return Err(ConversionError::Failed {
                message: format!(
                    "return value of {} bytes does not fit a {capacity} byte slot",
                    T::SIZE
                ),
            });
        }
        if T::SIZE == 0 {
            return Ok(());
        }
        // SAFETY: capacity checked above against the size given to `from_raw`.
        let out = unsafe { std::slice::from_raw_parts_mut(self.ret.cast::<u8>(), T::SIZE) };
        value.encode(out);
        self.written = true;
        Ok(())
    }

    /// Copy raw handle words into the return slot.
    pub fn write_words(&mut self, words: &[u64]) -> Result<(), ConversionError> {
        let bytes: &[u8] = bytemuck::cast_slice(words);
        let capacity = self.kind.bytes();
        if bytes.len() > capacity {
            return Err(ConversionError::Failed {
                message: format!(
                    "{} handle words do not fit a {capacity} byte slot",
                    words.len()
                ),
            });
        }
        if !bytes.is_empty() {
            // SAFETY: capacity checked above.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ret.cast::<u8>(), bytes.len())
            };
            self.written = true;
        }
        Ok(())
    }

    /// Fill the whole slot with zeroes.
    pub fn zero_fill(&mut self) {
        let len = self.kind.bytes();
        if len > 0 {
            // SAFETY: `len` is the size given to `from_raw`.
            unsafe { std::ptr::write_bytes(self.ret.cast::<u8>(), 0, len) };
        }
        self.written = false;
    }
}

impl std::fmt::Debug for ReturnView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnView")
            .field("kind", &self.kind)
            .field("written", &self.written)
            .finish()
    }
}
