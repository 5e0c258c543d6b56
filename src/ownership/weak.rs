use std::fmt;
use std::marker::PhantomData;

use enginebridge_core::{BridgeError, BridgeResult, ObjectType, Words};
use enginebridge_frame::Frame;

use crate::engine::{CallTarget, Engine, InstanceId};

/// An object the engine may destroy at any time.
///
/// Holds the object's instance id and checks it against the engine before
/// every use; a destroyed object yields [`BridgeError::Invalidated`].
pub struct Weak<T: ObjectType> {
    engine: Engine,
    object: Words<1>,
    instance_id: InstanceId,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ObjectType> Weak<T> {
    pub(crate) fn new(engine: Engine, object: Words<1>) -> BridgeResult<Self> {
        let instance_id = engine.instance_id(object)?;
        let weak = Self {
            engine,
            object,
            instance_id,
            _marker: PhantomData,
        };
        weak.get()?;
        Ok(weak)
    }

    /// Look up a previously recorded instance id.
    pub fn from_instance_id(engine: Engine, instance_id: InstanceId) -> BridgeResult<Self> {
        let object = engine
            .instance_from_id(instance_id)?
            .ok_or(BridgeError::Invalidated {
                instance_id: instance_id.0,
            })?;
        Ok(Self {
            engine,
            object,
            instance_id,
            _marker: PhantomData,
        })
    }

    /// The object, if it still exists.
    pub fn get(&self) -> BridgeResult<Words<1>> {
        if self.engine.is_alive(self.object, self.instance_id)? {
            Ok(self.object)
        } else {
            Err(BridgeError::Invalidated {
                instance_id: self.instance_id.0,
            })
        }
    }

    pub fn is_alive(&self) -> bool {
        self.get().is_ok()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Call a method on the object after checking it is still alive.
    ///
    /// # Safety
    ///
    /// The frame must match the signature of the method behind `target`.
    pub unsafe fn call(&self, target: &CallTarget, frame: &mut Frame) -> BridgeResult<()> {
        let object = self.get()?;
        unsafe { self.engine.call(target, object, frame) }
    }

    /// Destroy the object if it still exists.
    pub fn destroy(self) -> BridgeResult<()> {
        let object = self.get()?;
        self.engine.destroy(object)
    }
}

impl<T: ObjectType> Clone for Weak<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            object: self.object,
            instance_id: self.instance_id,
            _marker: PhantomData,
        }
    }
}

impl<T: ObjectType> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("class", &T::CLASS_NAME)
            .field("object", &self.object)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginebridge_core::Object;
    use enginebridge_mock::MockEngine;

    #[test]
    fn destroyed_object_is_invalidated() {
        let mock = MockEngine::new();
        let engine = Engine::new(mock.clone());
        let node = mock.spawn("Node");
        let weak = Weak::<Object>::new(engine.clone(), node).unwrap();
        assert_eq!(weak.get(), Ok(node));

        mock.destroy(node);
        assert_eq!(
            weak.get(),
            Err(BridgeError::Invalidated {
                instance_id: weak.instance_id().0
            })
        );
        assert!(!weak.is_alive());
        assert!(weak.clone().destroy().is_err());
        assert_eq!(mock.stats().double_frees, 0);
    }

    #[test]
    fn lookup_by_instance_id() {
        let mock = MockEngine::new();
        let engine = Engine::new(mock.clone());
        let node = mock.spawn("Node");
        let id = InstanceId(mock.instance_id(node).unwrap());

        let weak = Weak::<Object>::from_instance_id(engine.clone(), id).unwrap();
        weak.destroy().unwrap();
        assert!(!mock.is_alive(node));
        assert!(Weak::<Object>::from_instance_id(engine, id).is_err());
    }
}
