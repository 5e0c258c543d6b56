//! Native-side state of the mock engine, one world per thread.

use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

use enginebridge_core::VariantType;
use enginebridge_core::abi::{
    CallVirtualWithDataFn, ClassCreationInfo, FreeInstanceFn, GetVirtualCallDataFn, ReferenceFn,
    ref_counted_hashes,
};
use rustc_hash::FxHashMap;

use crate::call::MockCall;

thread_local! {
    static WORLD: RefCell<World> = RefCell::new(World::new());
}

/// Run `f` with the current thread's world. `f` must not call back into host
/// code; callbacks are collected and run after the borrow ends.
pub(crate) fn with<R>(f: impl FnOnce(&mut World) -> R) -> R {
    WORLD.with(|world| f(&mut world.borrow_mut()))
}

pub(crate) fn reset() {
    WORLD.with(|world| *world.borrow_mut() = World::new());
}

pub(crate) type Handler = Rc<dyn Fn(&mut MockCall)>;

pub(crate) struct MockBind {
    pub class: String,
    pub method: String,
    pub hash: i64,
    pub handler: Handler,
}

pub(crate) struct MockClass {
    pub parent: Option<String>,
    pub extension: Option<ClassCreationInfo>,
}

/// Host instance attached to a native object.
#[derive(Clone, Copy)]
pub(crate) struct InstanceBinding {
    pub instance: *mut c_void,
    pub class_userdata: *mut c_void,
    pub free: Option<FreeInstanceFn>,
    pub reference: Option<ReferenceFn>,
    pub unreference: Option<ReferenceFn>,
    pub get_virtual: Option<GetVirtualCallDataFn>,
    pub call_virtual: Option<CallVirtualWithDataFn>,
}

pub(crate) struct MockObject {
    pub class: String,
    pub instance_id: u64,
    pub ref_count: Option<u32>,
    pub binding: Option<InstanceBinding>,
}

pub(crate) enum MockValue {
    String(String),
    Array(Vec<u64>),
    Other(VariantType),
}

/// Counters exposed to tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub ptrcalls: usize,
    pub references: usize,
    pub unreferences: usize,
    pub objects_destroyed: usize,
    pub values_destroyed: usize,
    pub instances_freed: usize,
    pub virtual_calls: usize,
    /// Releases of handles the engine no longer knows about.
    pub double_frees: usize,
}

pub(crate) struct World {
    next_addr: u64,
    next_instance_id: u64,
    pub objects: FxHashMap<u64, MockObject>,
    pub by_instance_id: FxHashMap<u64, u64>,
    pub name_ids: FxHashMap<String, u64>,
    pub names: FxHashMap<u64, (String, u32)>,
    pub values: FxHashMap<u64, MockValue>,
    pub classes: FxHashMap<String, MockClass>,
    pub binds: FxHashMap<u64, MockBind>,
    pub singletons: FxHashMap<String, u64>,
    pub stats: MockStats,
}

impl World {
    fn new() -> Self {
        let mut world = World {
            next_addr: 0x1000,
            next_instance_id: 1,
            objects: FxHashMap::default(),
            by_instance_id: FxHashMap::default(),
            name_ids: FxHashMap::default(),
            names: FxHashMap::default(),
            values: FxHashMap::default(),
            classes: FxHashMap::default(),
            binds: FxHashMap::default(),
            singletons: FxHashMap::default(),
            stats: MockStats::default(),
        };
        world.define_class("Object", None);
        world.define_class("RefCounted", Some("Object"));
        world.define_class("Node", Some("Object"));
        world.define_class("Resource", Some("RefCounted"));
        world.install_ref_counted_binds();
        world
    }

    pub fn alloc(&mut self) -> u64 {
        let addr = self.next_addr;
        self.next_addr += 0x10;
        addr
    }

    pub fn define_class(&mut self, name: &str, parent: Option<&str>) {
        self.classes.insert(
            name.to_string(),
            MockClass {
                parent: parent.map(str::to_string),
                extension: None,
            },
        );
    }

    pub fn is_ref_counted(&self, class: &str) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == "RefCounted" {
                return true;
            }
            current = self
                .classes
                .get(name)
                .and_then(|class| class.parent.as_deref());
        }
        false
    }

    pub fn spawn(&mut self, class: &str) -> u64 {
        let addr = self.alloc();
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        let ref_count = self.is_ref_counted(class).then_some(1);
        self.objects.insert(
            addr,
            MockObject {
                class: class.to_string(),
                instance_id,
                ref_count,
                binding: None,
            },
        );
        self.by_instance_id.insert(instance_id, addr);
        addr
    }

    /// Remove an object, returning its host binding if it had one.
    pub fn remove_object(&mut self, addr: u64) -> Result<Option<InstanceBinding>, ()> {
        match self.objects.remove(&addr) {
            Some(object) => {
                self.by_instance_id.remove(&object.instance_id);
                self.stats.objects_destroyed += 1;
                Ok(object.binding)
            }
            None => {
                self.stats.double_frees += 1;
                Err(())
            }
        }
    }

    pub fn intern(&mut self, text: &str) -> u64 {
        if let Some(&id) = self.name_ids.get(text) {
            if let Some(entry) = self.names.get_mut(&id) {
                entry.1 += 1;
            }
            return id;
        }
        let id = self.alloc();
        self.name_ids.insert(text.to_string(), id);
        self.names.insert(id, (text.to_string(), 1));
        id
    }

    pub fn name_text(&self, id: u64) -> Option<&str> {
        self.names.get(&id).map(|(text, _)| text.as_str())
    }

    pub fn release_name(&mut self, id: u64) {
        match self.names.get_mut(&id) {
            Some(entry) if entry.1 > 1 => entry.1 -= 1,
            Some(_) => {
                if let Some((text, _)) = self.names.remove(&id) {
                    self.name_ids.remove(&text);
                }
            }
            None => self.stats.double_frees += 1,
        }
    }

    pub fn new_value(&mut self, value: MockValue) -> u64 {
        let id = self.alloc();
        self.values.insert(id, value);
        id
    }

    pub fn bind(&mut self, class: &str, method: &str, hash: i64, handler: Handler) -> u64 {
        let existing = self
            .binds
            .iter()
            .find(|(_, bind)| bind.class == class && bind.method == method)
            .map(|(addr, _)| *addr);
        let addr = existing.unwrap_or_else(|| self.alloc());
        self.binds.insert(
            addr,
            MockBind {
                class: class.to_string(),
                method: method.to_string(),
                hash,
                handler,
            },
        );
        addr
    }

    /// Look up a bind on `class` or any of its ancestors.
    pub fn find_bind(&self, class: &str, method: &str, hash: i64) -> Option<u64> {
        let mut current = Some(class);
        while let Some(name) = current {
            let found = self
                .binds
                .iter()
                .find(|(_, bind)| bind.class == name && bind.method == method && bind.hash == hash)
                .map(|(addr, _)| *addr);
            if found.is_some() {
                return found;
            }
            current = self
                .classes
                .get(name)
                .and_then(|class| class.parent.as_deref());
        }
        None
    }

    fn install_ref_counted_binds(&mut self) {
        self.bind(
            "RefCounted",
            "reference",
            ref_counted_hashes::REFERENCE,
            Rc::new(|call: &mut MockCall| {
                let ok = crate::adjust_ref_count(call.object_addr(), 1).is_some();
                call.set_return(ok);
            }),
        );
        self.bind(
            "RefCounted",
            "unreference",
            ref_counted_hashes::UNREFERENCE,
            Rc::new(|call: &mut MockCall| {
                let died = crate::adjust_ref_count(call.object_addr(), -1) == Some(0);
                call.set_return(died);
            }),
        );
        self.bind(
            "RefCounted",
            "get_reference_count",
            ref_counted_hashes::GET_REFERENCE_COUNT,
            Rc::new(|call: &mut MockCall| {
                let count = with(|world| {
                    world
                        .objects
                        .get(&call.object_addr())
                        .and_then(|object| object.ref_count)
                        .unwrap_or(0)
                });
                call.set_return(count as i32);
            }),
        );
    }
}
