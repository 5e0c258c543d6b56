//! Host classes registered with the engine, and the virtual calls the engine
//! makes into them.
//!
//! An [`Extension`] owns the class table for one library. Classes are
//! registered either immediately or queued for an [`InitLevel`]; each registered
//! class hands the engine a set of trampolines that create and free host
//! instances and route virtual calls by interned method name.
//!
//! ```ignore
//! struct Spinner { speed: f64, angle: f64 }
//!
//! impl ExtensionClass for Spinner {
//!     const CLASS_NAME: &'static str = "Spinner";
//!     const PARENT: &'static ParentClass = &parents::NODE;
//!
//!     fn create(_base: InstanceBase) -> Self {
//!         Spinner { speed: 1.0, angle: 0.0 }
//!     }
//!
//!     fn register_virtuals(builder: &mut ClassBuilder<Self>) {
//!         builder.virtual_method("_process", |this, call| {
//!             this.angle += this.speed * call.arg::<f64>(0)?;
//!             Ok(())
//!         });
//!     }
//! }
//!
//! let extension = Extension::new(engine);
//! extension.register::<Spinner>()?;
//! ```

mod builder;
mod call;
mod class;
mod entry;
mod instances;
mod trampolines;

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use enginebridge_core::abi::{ClassCreationInfo, ConstPtr};
use enginebridge_core::{BridgeError, BridgeResult, EngineProperty, InitLevel, NativeError, Words};
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::engine::Engine;
use crate::ownership::Registry;

pub use builder::{ClassBuilder, VirtualFn};
pub use call::VirtualCall;
pub use class::{ExtensionClass, InstanceBase, ParentClass, VirtualSignature, parents};
pub use entry::{ClassState, Dispatch};

use entry::{ClassEntry, VirtualEntry, run_virtual};

bitflags! {
    /// Initialization levels the engine has entered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Levels: u8 {
        const CORE = 1 << 0;
        const SERVERS = 1 << 1;
        const SCENE = 1 << 2;
        const EDITOR = 1 << 3;
    }
}

impl From<InitLevel> for Levels {
    fn from(level: InitLevel) -> Self {
        Levels::from_bits_truncate(1 << u32::from(level))
    }
}

type Register = fn(&Extension, InitLevel) -> BridgeResult<()>;
type StartupHook = Box<dyn FnOnce(&Extension) -> BridgeResult<()>>;
type CleanupHook = Box<dyn FnOnce(&Extension)>;

struct PendingClass {
    name: &'static str,
    level: InitLevel,
    register: Register,
}

/// The class table of one extension library.
pub struct Extension {
    registry: Registry,
    classes: RefCell<FxHashMap<&'static str, Rc<ClassEntry>>>,
    pending: RefCell<Vec<PendingClass>>,
    startup: RefCell<Vec<(InitLevel, StartupHook)>>,
    cleanup: RefCell<Vec<(InitLevel, CleanupHook)>>,
    levels: Cell<Levels>,
}

impl Extension {
    pub fn new(engine: Engine) -> Self {
        Self::with_registry(Registry::new(engine))
    }

    /// Share an existing registry with the extension's virtual calls.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            classes: RefCell::new(FxHashMap::default()),
            pending: RefCell::new(Vec::new()),
            startup: RefCell::new(Vec::new()),
            cleanup: RefCell::new(Vec::new()),
            levels: Cell::new(Levels::empty()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> &Engine {
        self.registry.engine()
    }

    /// Register `T` with the engine now, as a scene-level class.
    pub fn register<T: ExtensionClass>(&self) -> BridgeResult<()> {
        self.register_class::<T>(InitLevel::Scene)
    }

    /// Register `T` when the engine enters `level`, or now if it already has.
    pub fn register_at<T: ExtensionClass>(&self, level: InitLevel) -> BridgeResult<()> {
        if self.levels.get().contains(Levels::from(level)) {
            return self.register_class::<T>(level);
        }
        self.pending.borrow_mut().push(PendingClass {
            name: T::CLASS_NAME,
            level,
            register: Self::register_class::<T>,
        });
        Ok(())
    }

    /// Run `hook` after the classes of `level` are registered.
    pub fn on_startup(
        &self,
        level: InitLevel,
        hook: impl FnOnce(&Extension) -> BridgeResult<()> + 'static,
    ) {
        self.startup.borrow_mut().push((level, Box::new(hook)));
    }

    /// Run `hook` when `level` is deinitialized, before its classes go away.
    pub fn on_cleanup(&self, level: InitLevel, hook: impl FnOnce(&Extension) + 'static) {
        self.cleanup.borrow_mut().push((level, Box::new(hook)));
    }

    fn register_class<T: ExtensionClass>(&self, level: InitLevel) -> BridgeResult<()> {
        if let Some(existing) = self.classes.borrow().get(T::CLASS_NAME)
            && existing.state.get() != ClassState::Finalized
        {
            return Err(BridgeError::DuplicateClass {
                class: T::CLASS_NAME.to_string(),
            });
        }

        let engine = self.engine();
        let max_args = engine.properties().get(EngineProperty::MaxVirtualArgs);
        let mut builder = ClassBuilder::<T>::new(max_args);
        T::register_virtuals(&mut builder);
        let handlers = builder.finish()?;

        let name_words = engine.string_name(T::CLASS_NAME)?;
        let parent_words = engine.string_name(T::PARENT.name)?;
        let mut virtuals = FxHashMap::default();
        for (signature, handler) in handlers {
            let key = engine.string_name(signature.name)?;
            virtuals.insert(key.0[0], Box::new(VirtualEntry::new::<T>(signature, handler)));
        }

        let entry = Rc::new(ClassEntry {
            name: T::CLASS_NAME,
            parent: T::PARENT,
            level,
            name_words,
            registry: self.registry.clone(),
            factory: entry::make::<T>,
            virtuals,
            state: Cell::new(ClassState::Registered),
            instances: Cell::new(0),
        });
        let info = ClassCreationInfo {
            is_virtual: 0,
            is_abstract: 0,
            is_exposed: 1,
            create_instance: Some(trampolines::create_instance),
            free_instance: Some(trampolines::free_instance),
            get_virtual_call_data: Some(trampolines::get_virtual_call_data),
            call_virtual_with_data: Some(trampolines::call_virtual_with_data),
            reference: Some(trampolines::reference),
            unreference: Some(trampolines::unreference),
            class_userdata: entry.userdata(),
        };
        engine.register_class(name_words, parent_words, &info)?;
        debug!(
            class = T::CLASS_NAME,
            parent = T::PARENT.name,
            ?level,
            virtuals = entry.virtuals.len(),
            "registered class"
        );
        self.classes.borrow_mut().insert(T::CLASS_NAME, entry);
        Ok(())
    }

    /// Unregister `class` from the engine. Instances already alive keep
    /// working until the engine frees them.
    pub fn unregister(&self, class: &str) -> BridgeResult<()> {
        let entry = self.live_entry(class)?;
        self.engine().unregister_class(entry.name_words)?;
        entry.state.set(ClassState::Finalized);
        debug!(class, instances = entry.instances.get(), "unregistered class");
        Ok(())
    }

    pub fn class_state(&self, class: &str) -> ClassState {
        self.classes
            .borrow()
            .get(class)
            .map_or(ClassState::Unregistered, |entry| entry.state.get())
    }

    /// Number of live host instances of `class`.
    pub fn instance_count(&self, class: &str) -> usize {
        self.classes
            .borrow()
            .get(class)
            .map_or(0, |entry| entry.instances.get())
    }

    pub fn is_initialized(&self, level: InitLevel) -> bool {
        self.levels.get().contains(Levels::from(level))
    }

    /// Enter `level`: register the classes queued for it, then run its
    /// startup hooks.
    pub fn initialize(&self, level: InitLevel) -> BridgeResult<()> {
        self.levels.set(self.levels.get() | Levels::from(level));

        let queued: Vec<PendingClass> = {
            let mut pending = self.pending.borrow_mut();
            let (now, later): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|class| class.level == level);
            *pending = later;
            now
        };
        for class in queued {
            (class.register)(self, level).inspect_err(|err| {
                error!(class = class.name, ?level, error = %err, "class registration failed");
            })?;
        }

        let hooks = take_level(&mut self.startup.borrow_mut(), level);
        for hook in hooks {
            hook(self).inspect_err(|err| {
                error!(?level, error = %err, "startup hook failed");
            })?;
        }
        debug!(?level, "initialized");
        Ok(())
    }

    /// Leave `level`: run its cleanup hooks in reverse order, unregister its
    /// classes and collect cycles left behind.
    pub fn deinitialize(&self, level: InitLevel) {
        let hooks = take_level(&mut self.cleanup.borrow_mut(), level);
        for hook in hooks.into_iter().rev() {
            hook(self);
        }

        let names: Vec<&'static str> = self
            .classes
            .borrow()
            .values()
            .filter(|entry| entry.level == level && entry.state.get() != ClassState::Finalized)
            .map(|entry| entry.name)
            .collect();
        for name in names {
            if let Err(err) = self.unregister(name) {
                warn!(class = name, error = %err, "failed to unregister class");
            }
        }

        let passes = self.engine().properties().get(EngineProperty::CyclesOnShutdown);
        for _ in 0..passes {
            self.registry.cycle();
        }
        self.levels.set(self.levels.get() - Levels::from(level));
        debug!(?level, "deinitialized");
    }

    /// Ask the engine for a new object of class `T`.
    pub fn instantiate<T: ExtensionClass>(&self) -> BridgeResult<Words<1>> {
        self.live_entry(T::CLASS_NAME)?;
        self.engine().construct(T::CLASS_NAME)
    }

    /// Run `f` on the host instance attached to `object`.
    pub fn with_instance<T: ExtensionClass, R>(
        &self,
        object: Words<1>,
        f: impl FnOnce(&mut T) -> R,
    ) -> BridgeResult<R> {
        let cell = instances::find(object).ok_or(BridgeError::NoInstance {
            object: object.0[0],
        })?;
        let mut value = cell.value.try_borrow_mut().map_err(|_| NativeError::Reentrant {
            class: cell.class.name,
        })?;
        let this = value.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
            NativeError::other(format!("{} is not a {}", cell.class.name, T::CLASS_NAME))
        })?;
        Ok(f(this))
    }

    /// Route a virtual call on `object` to its host override.
    ///
    /// Returns [`Dispatch::Fallthrough`] when the class does not override
    /// `method`. A failing override is logged and reported as
    /// [`Dispatch::Failed`] with a zeroed return slot.
    ///
    /// # Safety
    ///
    /// `args` and `ret` must match the parent's declared signature for
    /// `method`.
    pub unsafe fn dispatch_virtual(
        &self,
        object: Words<1>,
        method: &str,
        args: *const ConstPtr,
        ret: *mut c_void,
    ) -> BridgeResult<Dispatch> {
        let cell = instances::find(object).ok_or(BridgeError::NoInstance {
            object: object.0[0],
        })?;
        let key = self.engine().string_name(method)?;
        let Some(entry) = cell.class.virtuals.get(&key.0[0]) else {
            return Ok(Dispatch::Fallthrough);
        };
        // SAFETY: forwarded from the caller.
        Ok(unsafe { run_virtual(&cell, entry, args, ret) })
    }

    fn live_entry(&self, class: &str) -> BridgeResult<Rc<ClassEntry>> {
        match self.classes.borrow().get(class) {
            Some(entry) if entry.state.get() != ClassState::Finalized => Ok(Rc::clone(entry)),
            _ => Err(BridgeError::NotRegistered {
                class: class.to_string(),
            }),
        }
    }
}

fn take_level<H>(hooks: &mut Vec<(InitLevel, H)>, level: InitLevel) -> Vec<H> {
    let (now, later): (Vec<_>, Vec<_>) =
        hooks.drain(..).partition(|(hook_level, _)| *hook_level == level);
    *hooks = later;
    now.into_iter().map(|(_, hook)| hook).collect()
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<&str> = self.classes.borrow().keys().copied().collect();
        f.debug_struct("Extension")
            .field("classes", &classes)
            .field("pending", &self.pending.borrow().len())
            .field("levels", &self.levels.get())
            .finish()
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        let entries: Vec<Rc<ClassEntry>> = self.classes.borrow().values().cloned().collect();
        for entry in entries {
            if entry.state.get() == ClassState::Finalized {
                continue;
            }
            match self.engine().unregister_class(entry.name_words) {
                Ok(()) => entry.state.set(ClassState::Finalized),
                Err(err) => warn!(class = entry.name, error = %err, "failed to unregister class"),
            }
        }
    }
}
