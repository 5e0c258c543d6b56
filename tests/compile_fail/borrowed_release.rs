use enginebridge::prelude::*;
use enginebridge_mock::MockEngine;

fn main() {
    let mock = MockEngine::new();
    let registry = Registry::new(Engine::new(mock.clone()));
    let owner = ();
    let borrowed = registry.borrow::<NativeString, _>(mock.new_string("engine owned"), &owner);
    borrowed.release();
}
