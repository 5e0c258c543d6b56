//! Argument and return access for host virtual methods.

use std::any::Any;
use std::fmt;

use enginebridge_core::{
    BridgeError, ConversionError, NativeError, NativeString, NativeType, ObjectType, RawHandle,
    VariantType,
};
use enginebridge_frame::{ArgsView, FrameArg, FrameRet, ReturnView};

use crate::engine::Engine;
use crate::ownership::{Borrowed, Owned, Registry};

/// One virtual call from the engine into a host instance.
///
/// Handle arguments are borrowed for the duration of the call; the engine
/// keeps ownership of them. Values adopted with
/// [`temporary`](VirtualCall::temporary) are released when the call returns.
pub struct VirtualCall<'call> {
    args: ArgsView<'call>,
    ret: ReturnView<'call>,
    registry: &'call Registry,
    temporaries: Vec<Box<dyn Any>>,
}

impl<'call> VirtualCall<'call> {
    pub(crate) fn new(
        args: ArgsView<'call>,
        ret: ReturnView<'call>,
        registry: &'call Registry,
    ) -> Self {
        Self {
            args,
            ret,
            registry,
            temporaries: Vec::new(),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Decode plain-data argument `index`.
    pub fn arg<T: FrameRet>(&self, index: usize) -> Result<T, NativeError> {
        Ok(self.args.get(index)?)
    }

    /// Borrow handle argument `index`.
    pub fn handle<H: NativeType>(&self, index: usize) -> Result<Borrowed<'call, H>, NativeError> {
        let ptr = self.args.raw(index)?;
        // SAFETY: the engine passes a handle of the declared type, which is
        // `H::Raw::WORDS` words wide.
        let width = <H::Raw as RawHandle>::WORDS;
        let words = unsafe { std::slice::from_raw_parts(ptr.cast::<u64>(), width) };
        // SAFETY: the engine keeps arguments alive until the call returns.
        Ok(unsafe { Borrowed::from_raw(H::Raw::from_words(words)) })
    }

    /// Borrow object argument `index`, rejecting null.
    pub fn object<H: ObjectType>(&self, index: usize) -> Result<Borrowed<'call, H>, NativeError> {
        let object = self.handle::<H>(index)?;
        if object.is_null() {
            return Err(ConversionError::NullHandle {
                target_type: H::CLASS_NAME,
            }
            .into());
        }
        Ok(object)
    }

    /// Text of String argument `index`.
    pub fn string(&self, index: usize) -> Result<String, NativeError> {
        let string = self.handle::<NativeString>(index)?;
        self.engine().read_string(&string.get()).map_err(into_native)
    }

    /// Adopt a handle for the rest of the call. It is released when the call
    /// returns.
    pub fn temporary<H: NativeType>(
        &mut self,
        raw: H::Raw,
    ) -> Result<Borrowed<'call, H>, NativeError> {
        let owned = self.registry.adopt::<H>(raw).map_err(into_native)?;
        self.temporaries.push(Box::new(owned));
        // SAFETY: the temporary is released only when the call ends.
        Ok(unsafe { Borrowed::from_raw(raw) })
    }

    /// Encode the return value.
    pub fn set_return<T: FrameArg>(&mut self, value: T) -> Result<(), NativeError> {
        Ok(self.ret.write(value)?)
    }

    /// Return a new engine String holding `text`.
    pub fn return_string(&mut self, text: &str) -> Result<(), NativeError> {
        let mut string = self.engine().new_string(text).map_err(into_native)?;
        if let Err(err) = self.ret.write(string) {
            let _ = self.engine().destroy_value(VariantType::String, &mut string.0);
            return Err(err.into());
        }
        Ok(())
    }

    /// Return an owned value; ownership passes to the engine.
    pub fn return_owned<H: NativeType>(&mut self, value: Owned<H>) -> Result<(), NativeError> {
        let raw = value.get().map_err(into_native)?;
        self.ret.write_words(raw.words())?;
        value.end().map_err(into_native)?;
        Ok(())
    }

    pub fn has_returned(&self) -> bool {
        self.ret.is_written()
    }

    pub fn registry(&self) -> &'call Registry {
        self.registry
    }

    pub fn engine(&self) -> &'call Engine {
        self.registry.engine()
    }
}

impl fmt::Debug for VirtualCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCall")
            .field("args", &self.args)
            .field("ret", &self.ret)
            .field("temporaries", &self.temporaries.len())
            .finish()
    }
}

fn into_native(err: BridgeError) -> NativeError {
    match err {
        BridgeError::Native(native) => native,
        BridgeError::Conversion(conversion) => conversion.into(),
        other => NativeError::other(other.to_string()),
    }
}
