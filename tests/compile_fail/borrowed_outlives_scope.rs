use enginebridge::prelude::*;
use enginebridge_mock::MockEngine;

fn main() {
    let mock = MockEngine::new();
    let registry = Registry::new(Engine::new(mock.clone()));
    let escaped = {
        let owned = registry.adopt::<NativeString>(mock.new_string("short")).unwrap();
        owned.borrow().unwrap()
    };
    let _ = escaped.get();
}
