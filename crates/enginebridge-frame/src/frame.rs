//! Call frames: per-call argument and return storage.

use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use enginebridge_core::ConversionError;
use enginebridge_core::abi::{ConstPtr, MethodBindPtr, ObjectMethodBindPtrcallFn, ObjectPtr};

use crate::slot::{FrameArg, FrameRet, ReturnKind, words_for};

static POOL_LIMIT: AtomicUsize = AtomicUsize::new(8);
static INITIAL_WORDS: AtomicUsize = AtomicUsize::new(16);

thread_local! {
    static POOL: RefCell<Vec<Buffers>> = const { RefCell::new(Vec::new()) };
}

/// Frame pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Released frames each thread keeps for reuse.
    pub limit: usize,
    /// Argument words a new frame starts with.
    pub initial_words: usize,
}

/// Set how many released frames each thread keeps and how large new frames
/// start, returning the previous settings.
///
/// The settings are process-wide: every thread's pool reads them, and the
/// last call wins.
pub fn configure_pool(settings: PoolSettings) -> PoolSettings {
    PoolSettings {
        limit: POOL_LIMIT.swap(settings.limit, Ordering::Relaxed),
        initial_words: INITIAL_WORDS.swap(settings.initial_words, Ordering::Relaxed),
    }
}

pub fn pool_settings() -> PoolSettings {
    PoolSettings {
        limit: POOL_LIMIT.load(Ordering::Relaxed),
        initial_words: INITIAL_WORDS.load(Ordering::Relaxed),
    }
}

/// Number of released frames waiting for reuse on this thread.
pub fn pooled_frames() -> usize {
    POOL.try_with(|pool| pool.borrow().len()).unwrap_or(0)
}

#[derive(Default)]
struct Buffers {
    words: Vec<u64>,
    offsets: Vec<usize>,
    ret: Vec<u64>,
    pointers: Vec<ConstPtr>,
}

impl Buffers {
    fn take() -> Self {
        let pooled = POOL
            .try_with(|pool| pool.borrow_mut().pop())
            .ok()
            .flatten();
        pooled.unwrap_or_else(|| {
            let words = INITIAL_WORDS.load(Ordering::Relaxed);
            Buffers {
                words: Vec::with_capacity(words),
                offsets: Vec::with_capacity(words),
                ret: Vec::with_capacity(4),
                pointers: Vec::with_capacity(words),
            }
        })
    }

    fn give_back(mut self) {
        self.words.clear();
        self.offsets.clear();
        self.ret.clear();
        self.pointers.clear();
        let limit = POOL_LIMIT.load(Ordering::Relaxed);
        let _ = POOL.try_with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < limit {
                pool.push(self);
            }
        });
    }
}

/// Something that can perform a pointer call with a prepared frame.
pub trait CallDispatch {
    type Target: ?Sized;
    type Error;

    /// # Safety
    ///
    /// `args` must point to one valid pointer per declared argument and `ret`
    /// must be null or point to storage large enough for the declared return.
    unsafe fn ptrcall(
        &self,
        target: &Self::Target,
        object: ObjectPtr,
        args: *const ConstPtr,
        ret: *mut c_void,
    ) -> Result<(), Self::Error>;
}

impl CallDispatch for ObjectMethodBindPtrcallFn {
    type Target = MethodBindPtr;
    type Error = std::convert::Infallible;

    unsafe fn ptrcall(
        &self,
        target: &MethodBindPtr,
        object: ObjectPtr,
        args: *const ConstPtr,
        ret: *mut c_void,
    ) -> Result<(), Self::Error> {
        unsafe { (*self)(*target, object, args, ret) };
        Ok(())
    }
}

/// Typed handle to the return slot reserved in a [`Frame`].
///
/// Only the most recent reservation can be read; an older slot is rejected
/// by [`Frame::read_return`].
#[must_use = "the return value is read through this slot"]
pub struct ReturnSlot<R> {
    reservation: u32,
    _marker: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for ReturnSlot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReturnSlot<{}>#{}",
            std::any::type_name::<R>(),
            self.reservation
        )
    }
}

/// Argument and return storage for a single outbound call.
///
/// Arguments are encoded in push order, one pointer per argument is handed to
/// the engine, and the return slot is read after the call. Frames come from a
/// per-thread pool and go back to it when freed or dropped; a frame never
/// leaves the thread that created it.
///
/// ```
/// use enginebridge_frame::Frame;
///
/// let mut frame = Frame::new();
/// frame.push(1.0f64).push(2i64);
/// let ret = frame.reserve_return::<bool>();
/// assert_eq!(frame.len(), 2);
/// // Nothing was invoked, so the slot is still zeroed.
/// assert_eq!(frame.read_return(ret), Ok(false));
/// frame.free();
/// ```
pub struct Frame {
    buffers: Buffers,
    ret_kind: ReturnKind,
    reservation: u32,
    _not_send: PhantomData<*const ()>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buffers: Buffers::take(),
            ret_kind: ReturnKind::None,
            reservation: 0,
            _not_send: PhantomData,
        }
    }

    /// Append an argument.
    pub fn push<T: FrameArg>(&mut self, value: T) -> &mut Self {
        let words = words_for(T::SIZE).max(1);
        let start = self.buffers.words.len();
        self.buffers.words.resize(start + words, 0);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.buffers.words[start..]);
        value.encode(bytes);
        self.buffers.offsets.push(start);
        self
    }

    /// Append an argument already laid out as words.
    pub fn push_words(&mut self, words: &[u64]) -> &mut Self {
        let start = self.buffers.words.len();
        if words.is_empty() {
            self.buffers.words.push(0);
        } else {
            self.buffers.words.extend_from_slice(words);
        }
        self.buffers.offsets.push(start);
        self
    }

    /// Reserve a zeroed return slot sized for `R`.
    pub fn reserve_return<R: FrameRet>(&mut self) -> ReturnSlot<R> {
        self.reserve_return_kind(ReturnKind::of::<R>());
        ReturnSlot {
            reservation: self.reservation,
            _marker: PhantomData,
        }
    }

    /// Reserve a zeroed return slot of a size known only at runtime.
    pub fn reserve_return_kind(&mut self, kind: ReturnKind) {
        self.reservation = self.reservation.wrapping_add(1);
        self.ret_kind = kind;
        self.buffers.ret.clear();
        self.buffers.ret.resize(kind.words(), 0);
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.ret_kind
    }

    /// Number of arguments pushed so far.
    pub fn len(&self) -> usize {
        self.buffers.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.offsets.is_empty()
    }

    /// Pointer array and return pointer in the shape the engine expects.
    ///
    /// The pointers stay valid until the frame is next mutated.
    pub fn raw_parts(&mut self) -> (*const ConstPtr, *mut c_void) {
        let Buffers {
            words,
            offsets,
            ret,
            pointers,
        } = &mut self.buffers;
        pointers.clear();
        let base = words.as_ptr();
        // SAFETY: every offset was recorded inside `words`.
        pointers.extend(
            offsets
                .iter()
                .map(|&offset| unsafe { base.add(offset) } as ConstPtr),
        );
        let ret_ptr = if ret.is_empty() {
            std::ptr::null_mut()
        } else {
            ret.as_mut_ptr().cast()
        };
        (pointers.as_ptr(), ret_ptr)
    }

    /// Perform the call.
    ///
    /// # Safety
    ///
    /// The pushed arguments and reserved return slot must match, in order and
    /// type, the signature of the method `target` resolves to. The engine does
    /// not check this.
    pub unsafe fn invoke<D: CallDispatch + ?Sized>(
        &mut self,
        dispatch: &D,
        target: &D::Target,
        object: ObjectPtr,
    ) -> Result<(), D::Error> {
        let (args, ret) = self.raw_parts();
        unsafe { dispatch.ptrcall(target, object, args, ret) }
    }

    /// Decode the return slot.
    ///
    /// Fails when `slot` came from an earlier reservation than the current
    /// one, or when the current slot is too small for `R`.
    pub fn read_return<R: FrameRet>(&self, slot: ReturnSlot<R>) -> Result<R, ConversionError> {
        if slot.reservation != self.reservation {
            return Err(ConversionError::StaleReturnSlot {
                slot: slot.reservation,
                current: self.reservation,
            });
        }
        let bytes = self.return_bytes();
        if bytes.len() < R::SIZE {
            return Err(ConversionError::Failed {
                message: format!(
                    "return slot holds {} bytes, {} needs {}",
                    bytes.len(),
                    std::any::type_name::<R>(),
                    R::SIZE
                ),
            });
        }
        Ok(R::decode(bytes))
    }

    /// Raw bytes of the reserved return slot.
    pub fn return_bytes(&self) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.buffers.ret);
        &bytes[..self.ret_kind.bytes().min(bytes.len())]
    }

    /// Return the frame to the per-thread pool.
    pub fn free(self) {}
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        std::mem::take(&mut self.buffers).give_back();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("args", &self.len())
            .field("words", &self.buffers.words.len())
            .field("return", &self.ret_kind)
            .finish()
    }
}
