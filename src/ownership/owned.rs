use std::fmt;
use std::marker::PhantomData;

use enginebridge_core::{BridgeError, BridgeResult, NativeType, RawHandle};

use super::registry::{PointerId, Registry, Tracked};
use super::Borrowed;

/// A native value the host owns and must release exactly once.
///
/// Release happens through [`release`](Owned::release), or on drop as a last
/// resort. [`end`](Owned::end) hands the raw handle on without releasing it,
/// for calls that consume their argument. Both take `self`, so a value cannot
/// be released twice.
///
/// The registry can still release the slot underneath a live wrapper, by id
/// or at shutdown. From then on every accessor fails with
/// [`BridgeError::Released`] instead of handing out the stale handle.
pub struct Owned<T: NativeType> {
    registry: Registry,
    id: PointerId,
    raw: T::Raw,
    _marker: PhantomData<fn() -> T>,
}

impl<T: NativeType> Owned<T> {
    pub(crate) fn new(registry: Registry, id: PointerId, raw: T::Raw) -> Self {
        Self {
            registry,
            id,
            raw,
            _marker: PhantomData,
        }
    }

    /// The raw handle, for passing as a call argument. Ownership stays here.
    pub fn get(&self) -> BridgeResult<T::Raw> {
        if self.is_tracked() {
            Ok(self.raw)
        } else {
            Err(self.released())
        }
    }

    pub fn id(&self) -> PointerId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Whether the registry still tracks this value. A collection pass or
    /// shutdown can release it while the wrapper is alive.
    pub fn is_tracked(&self) -> bool {
        self.registry.is_live(self.id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Borrow the value for as long as this wrapper lives.
    pub fn borrow(&self) -> BridgeResult<Borrowed<'_, T>> {
        Ok(Borrowed::bound_to(self.get()?, self))
    }

    /// Give up ownership without releasing, returning the handle one last
    /// time.
    pub fn end(self) -> BridgeResult<T::Raw> {
        match self.registry.end(self.id) {
            Some(_) => Ok(self.raw),
            None => Err(self.released()),
        }
    }

    fn released(&self) -> BridgeError {
        BridgeError::Released { type_name: T::NAME }
    }

    /// Release the native value now.
    pub fn release(self) {
        self.registry.release(self.id);
    }
}

impl<T: NativeType> Tracked for Owned<T> {
    fn pointer_id(&self) -> PointerId {
        self.id
    }
}

impl<T: NativeType> Drop for Owned<T> {
    fn drop(&mut self) {
        self.registry.drop_wrapper(self.id);
    }
}

impl<T: NativeType> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("type", &T::NAME)
            .field("id", &self.id)
            .field("raw", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use enginebridge_core::{BridgeError, NativeString, NativeType, Object};
    use enginebridge_mock::MockEngine;

    use crate::engine::Engine;
    use crate::ownership::Registry;

    #[test]
    fn drop_releases_once() {
        let mock = MockEngine::new();
        let registry = Registry::new(Engine::new(mock.clone()));
        let string = registry
            .adopt::<NativeString>(mock.new_string("x"))
            .unwrap();
        drop(string);
        assert_eq!(mock.stats().values_destroyed, 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn end_keeps_native_value() {
        let mock = MockEngine::new();
        let registry = Registry::new(Engine::new(mock.clone()));
        let node = mock.spawn("Node");
        let owned = registry.adopt::<Object>(node).unwrap();
        assert_eq!(owned.end(), Ok(node));
        assert!(mock.is_alive(node));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn released_by_id_stops_handing_out_the_handle() {
        let mock = MockEngine::new();
        let registry = Registry::new(Engine::new(mock.clone()));
        let string = mock.new_string("gone");
        let owned = registry.adopt::<NativeString>(string).unwrap();

        assert!(registry.release(owned.id()));
        assert!(!mock.is_value_alive(&string.0));
        let released = BridgeError::Released {
            type_name: NativeString::NAME,
        };
        assert_eq!(owned.get(), Err(released.clone()));
        assert!(owned.borrow().is_err());
        assert_eq!(owned.end(), Err(released));
        assert_eq!(mock.stats().double_frees, 0);
    }

    #[test]
    fn shutdown_invalidates_live_wrappers() {
        let mock = MockEngine::new();
        let registry = Registry::new(Engine::new(mock.clone()));
        let owned = registry.adopt::<NativeString>(mock.new_string("late")).unwrap();

        assert_eq!(registry.shutdown().released, 1);
        assert!(!owned.is_tracked());
        assert!(matches!(owned.end(), Err(BridgeError::Released { .. })));
        assert_eq!(mock.stats().values_destroyed, 1);
        assert_eq!(mock.stats().double_frees, 0);
    }

    #[test]
    fn null_handles_are_never_released() {
        let mock = MockEngine::new();
        let registry = Registry::new(Engine::new(mock.clone()));
        let owned = registry.adopt::<Object>(enginebridge_core::Words::NULL).unwrap();
        assert!(owned.is_null());
        owned.release();
        assert_eq!(mock.stats().double_frees, 0);
        assert_eq!(mock.stats().objects_destroyed, 0);
    }
}
