//! Argument access for mock method handlers.

use std::ffi::c_void;

use enginebridge_core::Words;
use enginebridge_core::abi::ConstPtr;
use enginebridge_frame::{ArgsView, FrameArg, FrameRet};

use crate::world::{self, MockValue};

/// A ptrcall as seen by a handler registered with
/// [`MockEngine::bind_method`](crate::MockEngine::bind_method).
///
/// The engine does not tell a method how many arguments it received, so
/// handlers read only the arguments their signature declares.
pub struct MockCall {
    object: u64,
    args: *const ConstPtr,
    ret: *mut c_void,
}

impl MockCall {
    pub(crate) fn new(object: u64, args: *const ConstPtr, ret: *mut c_void) -> Self {
        Self { object, args, ret }
    }

    pub(crate) fn object_addr(&self) -> u64 {
        self.object
    }

    /// The receiver object.
    pub fn object(&self) -> Words<1> {
        Words::new([self.object])
    }

    /// Decode argument `index`.
    pub fn arg<T: FrameRet>(&self, index: usize) -> Option<T> {
        // SAFETY: the caller of ptrcall supplied at least `index + 1` arguments
        // when the handler's signature declares them.
        let view = unsafe { ArgsView::from_raw(self.args, index + 1) };
        view.get(index).ok()
    }

    /// Text of a String argument.
    pub fn string_arg(&self, index: usize) -> Option<String> {
        let handle: Words<1> = self.arg(index)?;
        world::with(|world| match world.values.get(&handle.0[0]) {
            Some(MockValue::String(text)) => Some(text.clone()),
            _ => None,
        })
    }

    /// Write the return value.
    pub fn set_return<T: FrameArg>(&mut self, value: T) {
        if self.ret.is_null() || T::SIZE == 0 {
            return;
        }
        // SAFETY: the caller reserved a return slot for the declared type.
        let out = unsafe { std::slice::from_raw_parts_mut(self.ret.cast::<u8>(), T::SIZE) };
        value.encode(out);
    }

    /// Construct a new engine String directly in the return slot.
    pub fn return_string(&mut self, text: &str) {
        let id = world::with(|world| world.new_value(MockValue::String(text.to_string())));
        self.set_return(Words::new([id]));
    }
}
