//! Method binds resolved together at initialization.

use enginebridge_core::{BridgeResult, NameHash};
use rustc_hash::FxHashMap;
use tracing::{debug, error};

use super::{CallTarget, Engine};

/// One method a binding layer calls: class, method name and the engine's
/// signature hash for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSpec {
    pub class: &'static str,
    pub method: &'static str,
    pub hash: i64,
}

impl MethodSpec {
    pub const fn new(class: &'static str, method: &'static str, hash: i64) -> Self {
        Self {
            class,
            method,
            hash,
        }
    }

    pub fn key(&self) -> NameHash {
        NameHash::from_method(self.class, self.method, self.hash)
    }
}

/// Call targets for a set of [`MethodSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    targets: FxHashMap<NameHash, CallTarget>,
}

impl MethodTable {
    pub fn get(&self, spec: &MethodSpec) -> Option<CallTarget> {
        self.targets.get(&spec.key()).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Engine {
    /// Resolve every method, failing on the first one the engine does not know.
    pub fn bind_methods(&self, specs: &[MethodSpec]) -> BridgeResult<MethodTable> {
        let mut targets = FxHashMap::default();
        for spec in specs {
            let target = self
                .method_bind(spec.class, spec.method, spec.hash)
                .inspect_err(|err| error!(error = %err, "method table initialization failed"))?;
            targets.insert(spec.key(), target);
        }
        debug!(methods = targets.len(), "bound method table");
        Ok(MethodTable { targets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enginebridge_core::BridgeError;
    use enginebridge_mock::MockEngine;

    const GET_NAME: MethodSpec = MethodSpec::new("Node", "get_name", 2002593661);
    const QUEUE_FREE: MethodSpec = MethodSpec::new("Node", "queue_free", 3218959716);

    #[test]
    fn binds_every_method() {
        let mock = MockEngine::new();
        mock.bind_method("Node", "get_name", GET_NAME.hash, |_| {});
        mock.bind_method("Node", "queue_free", QUEUE_FREE.hash, |_| {});
        let engine = Engine::new(mock);

        let table = engine.bind_methods(&[GET_NAME, QUEUE_FREE]).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.get(&GET_NAME).is_some());
        assert_ne!(table.get(&GET_NAME), table.get(&QUEUE_FREE));
    }

    #[test]
    fn hash_mismatch_fails_initialization() {
        let mock = MockEngine::new();
        mock.bind_method("Node", "get_name", 1, |_| {});
        let engine = Engine::new(mock);

        let err = engine.bind_methods(&[GET_NAME]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::UnknownMethod {
                class: "Node".into(),
                method: "get_name".into(),
                hash: GET_NAME.hash,
            }
        );
    }
}
