use enginebridge::prelude::*;
use enginebridge_mock::MockEngine;

fn main() {
    let mock = MockEngine::new();
    let registry = Registry::new(Engine::new(mock.clone()));
    let owned = registry.adopt::<NativeString>(mock.new_string("once")).unwrap();
    owned.release();
    owned.release();
}
