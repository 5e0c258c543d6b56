//! Ownership classes for native handles.
//!
//! Every handle that crosses the boundary is wrapped according to who is
//! responsible for giving it back to the engine:
//!
//! - [`Owned<T>`]: the host owns it and releases it exactly once.
//! - [`Borrowed<'a, T>`]: something else owns it; valid for `'a`, never
//!   released by the host.
//! - [`Weak<T>`]: an object the engine may destroy; checked by instance id on
//!   every use.
//! - [`Ref<T>`]: one native reference to a reference-counted object.
//!
//! Which class applies to a returned handle is part of each native method's
//! contract and is chosen by the calling code.

mod borrowed;
mod owned;
mod ref_counted;
mod registry;
mod weak;

pub use borrowed::Borrowed;
pub use owned::Owned;
pub use ref_counted::Ref;
pub use registry::{CycleReport, PointerId, Registry, Tracked};
pub use weak::Weak;
