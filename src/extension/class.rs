//! Host classes the engine can instantiate.

use std::any::Any;

use enginebridge_core::{VariantType, Words};
use enginebridge_frame::ReturnKind;

use super::builder::ClassBuilder;
use crate::engine::InstanceId;

/// A host type exposed to the engine as a class.
///
/// The engine creates instances through [`create`](ExtensionClass::create)
/// whenever it constructs an object of [`CLASS_NAME`](ExtensionClass::CLASS_NAME),
/// and calls back into the virtual methods registered in
/// [`register_virtuals`](ExtensionClass::register_virtuals). Virtuals that are
/// not registered fall through to the parent's native behaviour.
pub trait ExtensionClass: Sized + 'static {
    const CLASS_NAME: &'static str;
    const PARENT: &'static ParentClass;

    fn create(base: InstanceBase) -> Self;

    fn register_virtuals(builder: &mut ClassBuilder<Self>) {
        let _ = builder;
    }

    /// Notified when the engine adds or drops a reference to a
    /// reference-counted instance.
    fn on_reference(&mut self, incremented: bool) {
        let _ = incremented;
    }
}

/// The native object a host instance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBase {
    object: Words<1>,
    instance_id: InstanceId,
}

impl InstanceBase {
    pub(crate) fn new(object: Words<1>, instance_id: InstanceId) -> Self {
        Self {
            object,
            instance_id,
        }
    }

    /// The native object. Owned by the engine, not the instance.
    pub fn object(&self) -> Words<1> {
        self.object
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

/// A virtual method a native class lets extensions override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSignature {
    pub name: &'static str,
    /// Number of arguments the engine passes.
    pub args: usize,
    pub ret: ReturnKind,
}

impl VirtualSignature {
    pub const fn new(name: &'static str, args: usize, ret: ReturnKind) -> Self {
        Self { name, args, ret }
    }
}

/// A native class extensions can derive from, with its overridable virtuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentClass {
    pub name: &'static str,
    pub ref_counted: bool,
    pub virtuals: &'static [VirtualSignature],
}

impl ParentClass {
    pub fn virtual_named(&self, name: &str) -> Option<&'static VirtualSignature> {
        self.virtuals.iter().find(|signature| signature.name == name)
    }
}

/// Descriptors for the native base classes extensions commonly derive from.
pub mod parents {
    use super::*;

    const TO_STRING: VirtualSignature = VirtualSignature::new(
        "_to_string",
        0,
        ReturnKind::for_variant_type(VariantType::String),
    );

    pub const OBJECT: ParentClass = ParentClass {
        name: "Object",
        ref_counted: false,
        virtuals: &[TO_STRING],
    };

    pub const REF_COUNTED: ParentClass = ParentClass {
        name: "RefCounted",
        ref_counted: true,
        virtuals: &[TO_STRING],
    };

    pub const RESOURCE: ParentClass = ParentClass {
        name: "Resource",
        ref_counted: true,
        virtuals: &[
            TO_STRING,
            VirtualSignature::new("_setup_local_to_scene", 0, ReturnKind::None),
        ],
    };

    pub const NODE: ParentClass = ParentClass {
        name: "Node",
        ref_counted: false,
        virtuals: &[
            TO_STRING,
            VirtualSignature::new("_ready", 0, ReturnKind::None),
            VirtualSignature::new("_enter_tree", 0, ReturnKind::None),
            VirtualSignature::new("_exit_tree", 0, ReturnKind::None),
            VirtualSignature::new("_process", 1, ReturnKind::None),
            VirtualSignature::new("_physics_process", 1, ReturnKind::None),
            VirtualSignature::new("_input", 1, ReturnKind::None),
            VirtualSignature::new(
                "_get_configuration_warnings",
                0,
                ReturnKind::for_variant_type(VariantType::PackedStringArray),
            ),
        ],
    };
}

/// A host instance with its concrete type erased.
pub(crate) trait ErasedInstance: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn notify_reference(&mut self, incremented: bool);
}

impl<T: ExtensionClass> ErasedInstance for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn notify_reference(&mut self, incremented: bool) {
        self.on_reference(incremented);
    }
}
