//! Call frame marshaling.
//!
//! Outbound calls build a [`Frame`]: arguments are pushed in order, a return
//! slot is reserved, and the frame is handed to a [`CallDispatch`] that performs
//! the pointer call. Inbound calls from the engine are read through
//! [`ArgsView`] and answered through [`ReturnView`].

pub mod frame;
pub mod slot;
pub mod view;

pub use frame::{
    CallDispatch, Frame, PoolSettings, ReturnSlot, configure_pool, pool_settings, pooled_frames,
};
pub use slot::{FrameArg, FrameRet, ReturnKind, words_for};
pub use view::{ArgsView, ReturnView};
