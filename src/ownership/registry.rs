//! Generational slot table of native handles owned by the host.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use enginebridge_core::{
    BridgeError, BridgeResult, EngineProperty, NativeType, ObjectType, RawHandle,
    RefCountedType, ReleaseKind, VariantType, Words,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use super::{Borrowed, Owned, Ref, Weak};
use crate::engine::Engine;

/// Identifies one tracked handle.
///
/// Ids are never reused: a released slot gets a new generation, so an old id
/// simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerId {
    pub index: u32,
    pub generation: u32,
}

/// Something backed by a registry slot.
pub trait Tracked {
    fn pointer_id(&self) -> PointerId;
}

/// Outcome of a collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Slots released by the pass.
    pub released: usize,
    /// Slots still tracked afterwards.
    pub live: usize,
}

/// How a slot gives its handle back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Destructor(VariantType),
    Destroy,
    Unreference,
}

impl Release {
    fn of<T: NativeType>() -> Self {
        match T::RELEASE {
            ReleaseKind::Destructor => Release::Destructor(T::VARIANT_TYPE),
            ReleaseKind::Destroy => Release::Destroy,
            ReleaseKind::Unreference => Release::Unreference,
        }
    }

    /// Only exclusively owned handles can be caught owned twice; every
    /// reference to a counted object is released on its own.
    fn is_exclusive(self) -> bool {
        !matches!(self, Release::Unreference)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SlotFlags: u8 {
        /// A host wrapper still refers to the slot.
        const WRAPPED = 1;
        /// The wrapper is gone but a holder keeps the slot alive.
        const DEFERRED = 1 << 1;
    }
}

struct Entry {
    raw: [u64; 3],
    width: usize,
    release: Release,
    flags: SlotFlags,
    holders: u32,
    children: Vec<PointerId>,
    type_name: &'static str,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// A handle on its way back to the engine.
struct PendingRelease {
    raw: [u64; 3],
    width: usize,
    release: Release,
    type_name: &'static str,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    owners: FxHashMap<[u64; 3], PointerId>,
}

impl Slots {
    fn insert(&mut self, entry: Entry) -> PointerId {
        let key = entry.raw;
        let exclusive = entry.release.is_exclusive() && key != [0; 3];
        let id = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            PointerId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            PointerId {
                index,
                generation: 0,
            }
        };
        if exclusive {
            self.owners.insert(key, id);
        }
        id
    }

    fn get(&self, id: PointerId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn get_mut(&mut self, id: PointerId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn remove(&mut self, id: PointerId) -> Option<Entry> {
        if let Some(slot) = self.slots.get_mut(id.index as usize)
            && slot.generation == id.generation
            && let Some(entry) = slot.entry.take()
        {
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(id.index);
            if self.owners.get(&entry.raw) == Some(&id) {
                self.owners.remove(&entry.raw);
            }
            return Some(entry);
        }
        None
    }

    fn live_ids(&self) -> impl Iterator<Item = PointerId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|_| PointerId {
                index: index as u32,
                generation: slot.generation,
            })
        })
    }

    /// Remove `id` and every deferred slot it was the last holder of.
    fn take_cascading(&mut self, id: PointerId, pending: &mut Vec<PendingRelease>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.remove(id) else {
                continue;
            };
            for child in &entry.children {
                if let Some(held) = self.get_mut(*child) {
                    held.holders = held.holders.saturating_sub(1);
                    if held.holders == 0 && held.flags.contains(SlotFlags::DEFERRED) {
                        stack.push(*child);
                    }
                }
            }
            pending.push(PendingRelease::from(entry));
        }
    }
}

impl From<Entry> for PendingRelease {
    fn from(entry: Entry) -> Self {
        PendingRelease {
            raw: entry.raw,
            width: entry.width,
            release: entry.release,
            type_name: entry.type_name,
        }
    }
}

/// Tracks every native handle the host owns on this thread.
///
/// Wrappers handed out by the registry ([`Owned`], [`Ref`]) release their
/// handle exactly once: explicitly, on drop, or when a collection pass finds
/// them unreachable. Native release calls always run after the registry's own
/// bookkeeping is done, so engine callbacks may re-enter it.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

struct RegistryInner {
    engine: Engine,
    state: RefCell<Slots>,
}

impl Registry {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                engine,
                state: RefCell::new(Slots::default()),
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Take ownership of a handle the engine has just transferred to the host.
    ///
    /// Fails with [`BridgeError::AlreadyOwned`] when another live wrapper
    /// already owns the same value.
    pub fn adopt<T: NativeType>(&self, raw: T::Raw) -> BridgeResult<Owned<T>> {
        let id = self.track(raw.words(), Release::of::<T>(), T::NAME)?;
        Ok(Owned::new(self.clone(), id, raw))
    }

    /// Wrap a handle that stays valid only while `bound_to` is alive.
    pub fn borrow<'a, T: NativeType, B: ?Sized>(
        &self,
        raw: T::Raw,
        bound_to: &'a B,
    ) -> Borrowed<'a, T> {
        Borrowed::bound_to(raw, bound_to)
    }

    /// Wrap an object that the engine may destroy behind the host's back.
    ///
    /// `raw` must be live at the time of the call, typically because it was
    /// just returned by the engine; later accesses re-validate it.
    pub fn assert_live<T: ObjectType>(&self, raw: Words<1>) -> BridgeResult<Weak<T>> {
        Weak::new(self.engine().clone(), raw)
    }

    /// Take over one reference to a reference-counted object.
    pub fn adopt_ref<T: RefCountedType>(&self, raw: Words<1>) -> BridgeResult<Ref<T>> {
        Ok(Ref::from_owned(self.adopt::<T>(raw)?))
    }

    pub(crate) fn track(
        &self,
        words: &[u64],
        release: Release,
        type_name: &'static str,
    ) -> BridgeResult<PointerId> {
        let mut raw = [0u64; 3];
        let width = words.len().min(3);
        raw[..width].copy_from_slice(&words[..width]);

        let mut state = self.inner.state.borrow_mut();
        if release.is_exclusive()
            && raw != [0; 3]
            && let Some(owner) = state.owners.get(&raw)
            && state.get(*owner).is_some()
        {
            return Err(BridgeError::AlreadyOwned {
                words: words.to_vec(),
            });
        }
        let id = state.insert(Entry {
            raw,
            width,
            release,
            flags: SlotFlags::WRAPPED,
            holders: 0,
            children: Vec::new(),
            type_name,
        });
        trace!(?id, type_name, "tracking handle");
        Ok(id)
    }

    /// Release the handle behind `id` now, whatever holds it.
    ///
    /// Returns `false` for an id that was already released or ended.
    pub fn release(&self, id: PointerId) -> bool {
        let mut pending = Vec::new();
        self.inner.state.borrow_mut().take_cascading(id, &mut pending);
        let released = !pending.is_empty();
        self.run_releases(pending);
        released
    }

    /// Stop tracking `id` without releasing it, returning its handle words.
    pub fn end(&self, id: PointerId) -> Option<Words<3>> {
        let mut state = self.inner.state.borrow_mut();
        let entry = state.remove(id)?;
        for child in &entry.children {
            if let Some(held) = state.get_mut(*child) {
                held.holders = held.holders.saturating_sub(1);
            }
        }
        trace!(?id, type_name = entry.type_name, "ownership ended");
        Some(Words::new(entry.raw))
    }

    /// Record that the value behind `parent` keeps `child` alive.
    ///
    /// A held child whose wrapper is dropped is deferred until its holders
    /// are released or a collection pass finds it unreachable.
    pub fn hold(&self, parent: &impl Tracked, child: &impl Tracked) -> bool {
        let (parent, child) = (parent.pointer_id(), child.pointer_id());
        let mut state = self.inner.state.borrow_mut();
        if state.get(child).is_none() {
            return false;
        }
        let Some(entry) = state.get_mut(parent) else {
            return false;
        };
        entry.children.push(child);
        if let Some(held) = state.get_mut(child) {
            held.holders += 1;
        }
        true
    }

    /// Remove one edge added by [`hold`](Self::hold). A deferred child left
    /// without holders is released.
    pub fn unhold(&self, parent: PointerId, child: PointerId) -> bool {
        let mut pending = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(entry) = state.get_mut(parent) else {
                return false;
            };
            let Some(pos) = entry.children.iter().position(|c| *c == child) else {
                return false;
            };
            entry.children.swap_remove(pos);
            if let Some(held) = state.get_mut(child) {
                held.holders = held.holders.saturating_sub(1);
                if held.holders == 0 && held.flags.contains(SlotFlags::DEFERRED) {
                    state.take_cascading(child, &mut pending);
                }
            }
        }
        self.run_releases(pending);
        true
    }

    /// Called when a wrapper goes away without an explicit release.
    pub(crate) fn drop_wrapper(&self, id: PointerId) {
        let mut pending = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(entry) = state.get_mut(id) else {
                return;
            };
            if entry.holders > 0 {
                entry.flags.remove(SlotFlags::WRAPPED);
                entry.flags.insert(SlotFlags::DEFERRED);
                trace!(?id, type_name = entry.type_name, "release deferred to holder");
                return;
            }
            state.take_cascading(id, &mut pending);
        }
        self.run_releases(pending);
    }

    /// Release every slot no wrapped slot can reach through holder edges.
    ///
    /// This breaks cycles between host wrappers and the native containers
    /// that refer back to them.
    pub fn cycle(&self) -> CycleReport {
        let mut pending = Vec::new();
        let live = {
            let mut state = self.inner.state.borrow_mut();
            let mut reachable = FxHashSet::default();
            let mut stack: Vec<PointerId> = state
                .live_ids()
                .filter(|id| {
                    state
                        .get(*id)
                        .is_some_and(|entry| entry.flags.contains(SlotFlags::WRAPPED))
                })
                .collect();
            while let Some(id) = stack.pop() {
                if !reachable.insert(id) {
                    continue;
                }
                if let Some(entry) = state.get(id) {
                    stack.extend(entry.children.iter().copied());
                }
            }

            let unreachable: Vec<PointerId> = state
                .live_ids()
                .filter(|id| !reachable.contains(id))
                .collect();
            let mut removed = Vec::with_capacity(unreachable.len());
            for id in unreachable {
                if let Some(entry) = state.remove(id) {
                    removed.push(entry);
                }
            }
            for entry in removed {
                for child in &entry.children {
                    if let Some(held) = state.get_mut(*child) {
                        held.holders = held.holders.saturating_sub(1);
                    }
                }
                pending.push(PendingRelease::from(entry));
            }
            state.live_ids().count()
        };
        let report = CycleReport {
            released: pending.len(),
            live,
        };
        self.run_releases(pending);
        debug!(released = report.released, live = report.live, "registry cycle");
        report
    }

    /// Collect, then release whatever is still tracked.
    ///
    /// Runs [`EngineProperty::CyclesOnShutdown`] passes first; anything left
    /// after them is a leak and is logged when [`EngineProperty::ReportLeaks`]
    /// is set.
    pub fn shutdown(&self) -> CycleReport {
        let properties = self.engine().properties();
        let mut report = CycleReport::default();
        for _ in 0..properties.get(EngineProperty::CyclesOnShutdown) {
            report.released += self.cycle().released;
        }

        let mut pending = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            let ids: Vec<PointerId> = state.live_ids().collect();
            for id in ids {
                if let Some(entry) = state.remove(id) {
                    pending.push(PendingRelease::from(entry));
                }
            }
        }
        if properties.flag(EngineProperty::ReportLeaks) {
            for leak in &pending {
                warn!(
                    type_name = leak.type_name,
                    words = ?&leak.raw[..leak.width],
                    "handle still tracked at shutdown"
                );
            }
        }
        report.released += pending.len();
        self.run_releases(pending);
        report
    }

    pub fn live_count(&self) -> usize {
        self.inner.state.borrow().live_ids().count()
    }

    pub fn is_live(&self, id: PointerId) -> bool {
        self.inner.state.borrow().get(id).is_some()
    }

    /// Whether `id` outlived its wrapper because something holds it.
    pub fn is_deferred(&self, id: PointerId) -> bool {
        self.inner
            .state
            .borrow()
            .get(id)
            .is_some_and(|entry| entry.flags.contains(SlotFlags::DEFERRED))
    }

    fn run_releases(&self, pending: Vec<PendingRelease>) {
        for mut pending in pending {
            if pending.raw == [0; 3] {
                continue;
            }
            let result = self.release_native(&mut pending);
            match result {
                Ok(()) => trace!(
                    type_name = pending.type_name,
                    words = ?&pending.raw[..pending.width],
                    "released handle"
                ),
                Err(err) => warn!(
                    type_name = pending.type_name,
                    error = %err,
                    "native release failed"
                ),
            }
        }
    }

    fn release_native(&self, pending: &mut PendingRelease) -> BridgeResult<()> {
        let engine = self.engine();
        let object = Words::new([pending.raw[0]]);
        match pending.release {
            Release::Destructor(variant_type) => {
                engine.destroy_value(variant_type, &mut pending.raw[..pending.width])
            }
            Release::Destroy => engine.destroy(object),
            Release::Unreference => {
                if engine.unreference(object)? {
                    engine.destroy(object)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Registry")
            .field("live", &state.live_ids().count())
            .field("free", &state.free_list.len())
            .finish()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let live = self.state.get_mut().live_ids().count();
        if live == 0 {
            return;
        }
        // Wrappers keep the registry alive, so only deferred and forgotten
        // slots can remain here.
        let registry = Registry {
            inner: Rc::new(RegistryInner {
                engine: self.engine.clone(),
                state: RefCell::new(std::mem::take(self.state.get_mut())),
            }),
        };
        registry.shutdown();
    }
}
