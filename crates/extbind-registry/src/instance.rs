//! Generational storage for extension-side instance state.
//!
//! When the host instantiates an extension class, the class constructor's
//! state is stored here and the host receives an [`InstanceId`]. Freed slots
//! are reused with a bumped generation so a stale id can never reach a newer
//! instance.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use extbind_core::StringName;
use parking_lot::Mutex;

/// Extension-side state of one instance.
pub type InstanceState = Box<dyn Any + Send>;

/// Handle to a live instance, as passed to and from the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

impl InstanceId {
    /// Pack into a non-zero machine word: generation (never 0) high, slot
    /// index low.
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack an id received from the host. Zero means "no instance".
    pub fn from_bits(bits: u64) -> Option<Self> {
        let id = InstanceId {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        };
        (id.generation != 0).then_some(id)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A live instance: its class and its lockable state.
#[derive(Clone)]
pub struct Instance {
    pub class: StringName,
    pub state: Arc<Mutex<InstanceState>>,
}

struct InstanceSlot {
    generation: u32,
    value: Option<Instance>,
}

impl InstanceSlot {
    /// Advance past the freed generation. Returns `false` once the counter
    /// is exhausted; the slot must then stay off the free list.
    fn advance(&mut self) -> bool {
        match self.generation.checked_add(1) {
            Some(next) => {
                self.generation = next;
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Slots {
    slots: Vec<InstanceSlot>,
    free_list: Vec<u32>,
    live: usize,
}

/// Storage for instance state with generational ids.
#[derive(Default)]
pub struct InstanceStore {
    inner: Mutex<Slots>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store state for a new instance of `class`.
    pub fn allocate(&self, class: StringName, state: InstanceState) -> InstanceId {
        let instance = Instance {
            class,
            state: Arc::new(Mutex::new(state)),
        };
        let mut inner = self.inner.lock();
        inner.live += 1;

        if let Some(index) = inner.free_list.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.value = Some(instance);
            InstanceId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(InstanceSlot {
                generation: 1,
                value: Some(instance),
            });
            InstanceId {
                index,
                generation: 1,
            }
        }
    }

    /// Look up a live instance.
    ///
    /// Returns None if the id is stale.
    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.clone()
    }

    /// Remove an instance, returning its state.
    ///
    /// Returns None if the id is stale.
    pub fn free(&self, id: InstanceId) -> Option<Instance> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let instance = slot.value.take()?;
        if slot.advance() {
            inner.free_list.push(id.index);
        }
        inner.live -= 1;
        Some(instance)
    }

    /// Run `f` on the state of `id` if it is live and of type `T`.
    pub fn with_state<T: Any, R>(&self, id: InstanceId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let instance = self.get(id)?;
        let mut state = instance.state.lock();
        state.downcast_mut::<T>().map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every instance, returning how many were still live.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let live = inner.live;
        let Slots {
            slots, free_list, ..
        } = &mut *inner;
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.value.take().is_some() && slot.advance() {
                free_list.push(index as u32);
            }
        }
        inner.live = 0;
        live
    }
}

impl fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InstanceStore")
            .field("slot_count", &inner.slots.len())
            .field("free_count", &inner.free_list.len())
            .field("live", &inner.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(i32);

    fn class() -> StringName {
        StringName::new("Counter")
    }

    #[test]
    fn allocate_and_get() {
        let store = InstanceStore::new();
        let id = store.allocate(class(), Box::new(Counter(1)));
        let instance = store.get(id).unwrap();
        assert_eq!(instance.class, class());
        assert_eq!(store.with_state(id, |c: &mut Counter| c.0), Some(1));
    }

    #[test]
    fn ids_are_never_zero() {
        let store = InstanceStore::new();
        let id = store.allocate(class(), Box::new(()));
        assert_ne!(id.to_bits(), 0);
        assert_eq!(InstanceId::from_bits(id.to_bits()), Some(id));
        assert_eq!(InstanceId::from_bits(0), None);
    }

    #[test]
    fn freed_id_is_stale() {
        let store = InstanceStore::new();
        let id = store.allocate(class(), Box::new(Counter(1)));
        assert!(store.free(id).is_some());
        assert!(store.get(id).is_none());
        assert!(store.free(id).is_none());
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let store = InstanceStore::new();
        let a = store.allocate(class(), Box::new(Counter(1)));
        store.free(a);
        let b = store.allocate(class(), Box::new(Counter(2)));
        assert_ne!(a, b);
        assert!(store.get(a).is_none());
        assert_eq!(store.with_state(b, |c: &mut Counter| c.0), Some(2));
    }

    #[test]
    fn exhausted_slot_is_not_reused() {
        let store = InstanceStore::new();
        let a = store.allocate(class(), Box::new(Counter(1)));
        store.free(a);
        store.inner.lock().slots[0].generation = u32::MAX;

        let last = store.allocate(class(), Box::new(Counter(2)));
        assert_eq!(last.index, 0);
        store.free(last);

        let next = store.allocate(class(), Box::new(Counter(3)));
        assert_ne!(next.index, 0);
        assert!(store.get(last).is_none());
        assert!(store.free(last).is_none());
        assert_eq!(store.with_state(next, |c: &mut Counter| c.0), Some(3));
    }

    #[test]
    fn with_state_checks_type() {
        let store = InstanceStore::new();
        let id = store.allocate(class(), Box::new(Counter(1)));
        assert_eq!(store.with_state(id, |s: &mut String| s.len()), None);
    }

    #[test]
    fn clear_reports_live_count() {
        let store = InstanceStore::new();
        let a = store.allocate(class(), Box::new(()));
        store.allocate(class(), Box::new(()));
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert!(store.get(a).is_none());
    }
}
