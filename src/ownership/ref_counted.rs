use std::fmt;

use enginebridge_core::{BridgeResult, RefCountedType, Words};

use super::registry::{PointerId, Release, Tracked};
use super::{Borrowed, Owned, Weak};

/// One reference to a reference-counted object.
///
/// Each `Ref` owns exactly one native reference. [`retain`](Ref::retain)
/// takes another and returns it as a separate `Ref`; dropping or
/// [`release_ref`](Ref::release_ref) gives one back, destroying the object
/// when the engine's count reaches zero.
pub struct Ref<T: RefCountedType> {
    owned: Owned<T>,
}

impl<T: RefCountedType> Ref<T> {
    pub(crate) fn from_owned(owned: Owned<T>) -> Self {
        Self { owned }
    }

    pub fn get(&self) -> BridgeResult<Words<1>> {
        self.owned.get()
    }

    pub fn id(&self) -> PointerId {
        self.owned.id()
    }

    /// Take another native reference.
    pub fn retain(&self) -> BridgeResult<Ref<T>> {
        let registry = self.owned.registry();
        let object = self.get()?;
        registry.engine().reference(object)?;
        let id = registry.track(object.as_slice(), Release::Unreference, T::NAME)?;
        Ok(Ref {
            owned: Owned::new(registry.clone(), id, object),
        })
    }

    /// Give this reference back to the engine.
    pub fn release_ref(self) {
        self.owned.release();
    }

    /// Native reference count, for diagnostics.
    pub fn reference_count(&self) -> BridgeResult<i32> {
        self.owned.registry().engine().reference_count(self.get()?)
    }

    /// Hand the reference on without giving it back.
    pub fn end(self) -> BridgeResult<Words<1>> {
        self.owned.end()
    }

    pub fn borrow(&self) -> BridgeResult<Borrowed<'_, T>> {
        self.owned.borrow()
    }

    /// An instance-checked handle that does not hold a reference.
    pub fn downgrade(&self) -> BridgeResult<Weak<T>> {
        self.owned.registry().assert_live::<T>(self.get()?)
    }
}

impl<T: RefCountedType> Tracked for Ref<T> {
    fn pointer_id(&self) -> PointerId {
        self.owned.id()
    }
}

impl<T: RefCountedType> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("class", &T::CLASS_NAME)
            .field("owned", &self.owned)
            .finish()
    }
}
