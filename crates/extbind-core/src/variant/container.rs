//! Container arms of [`Variant`].
//!
//! [`VariantArray`] and [`Dictionary`] are shared by reference: cloning one
//! (or the variant holding it) yields another alias of the same storage, and
//! mutations through either alias are visible through both. Use
//! `duplicate` for an independent copy.
//!
//! [`PackedArray`] is a typed buffer with value semantics implemented as
//! copy-on-write: clones share storage until one of them is mutated.
//!
//! Because containers alias, an array can end up containing itself.
//! Traversals that descend into nested containers (equality, hashing, deep
//! duplication, debug output) stop at [`MAX_NESTING`] levels.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use super::Variant;

/// Deepest container nesting a traversal descends into.
pub const MAX_NESTING: u32 = 100;

thread_local! {
    static NESTING: Cell<u32> = const { Cell::new(0) };
}

/// One level of container traversal on this thread.
struct Nesting;

impl Nesting {
    fn enter() -> Option<Nesting> {
        NESTING.with(|depth| {
            let current = depth.get();
            if current >= MAX_NESTING {
                return None;
            }
            depth.set(current + 1);
            Some(Nesting)
        })
    }
}

impl Drop for Nesting {
    fn drop(&mut self) {
        NESTING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// ============================================================================
// VariantArray
// ============================================================================

/// Ordered, heterogeneous, shared array of variants.
#[derive(Clone, Default)]
pub struct VariantArray(Arc<RwLock<Vec<Variant>>>);

impl VariantArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Variant>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn push(&self, value: Variant) {
        self.0.write().push(value);
    }

    pub fn pop(&self) -> Option<Variant> {
        self.0.write().pop()
    }

    pub fn get(&self, index: usize) -> Option<Variant> {
        self.0.read().get(index).cloned()
    }

    /// Replace element `index`. Returns `false` if out of range.
    pub fn set(&self, index: usize, value: Variant) -> bool {
        match self.0.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, index: usize) -> Option<Variant> {
        let mut items = self.0.write();
        (index < items.len()).then(|| items.remove(index))
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Variant> {
        self.0.read().clone()
    }

    /// Run `f` with the elements under a read lock.
    pub fn with<R>(&self, f: impl FnOnce(&[Variant]) -> R) -> R {
        f(&self.0.read())
    }

    /// Whether both arrays are aliases of the same storage.
    pub fn same_as(&self, other: &VariantArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of aliases sharing this storage.
    pub fn alias_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Independent copy. With `deep`, nested containers are copied too,
    /// down to [`MAX_NESTING`] levels; anything deeper comes back empty.
    pub fn duplicate(&self, deep: bool) -> Self {
        if !deep {
            return Self::from_vec(self.0.read().clone());
        }
        let Some(_level) = Nesting::enter() else {
            tracing::warn!(max = MAX_NESTING, "deep duplicate hit the nesting limit");
            return Self::new();
        };
        let items = self.0.read_recursive();
        Self::from_vec(items.iter().map(|v| v.duplicate(true)).collect())
    }
}

/// Containers nested past [`MAX_NESTING`] compare equal.
impl PartialEq for VariantArray {
    fn eq(&self, other: &Self) -> bool {
        if self.same_as(other) {
            return true;
        }
        let Some(_level) = Nesting::enter() else {
            return true;
        };
        *self.0.read_recursive() == *other.0.read_recursive()
    }
}

impl Eq for VariantArray {}

impl Hash for VariantArray {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let Some(_level) = Nesting::enter() else {
            return;
        };
        self.0.read_recursive().hash(state);
    }
}

impl FromIterator<Variant> for VariantArray {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl fmt::Debug for VariantArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_level) = Nesting::enter() else {
            return f.write_str("[...]");
        };
        f.debug_list().entries(self.0.read_recursive().iter()).finish()
    }
}

// ============================================================================
// Dictionary
// ============================================================================

/// Shared key → value map. Iteration order is unspecified.
#[derive(Clone, Default)]
pub struct Dictionary(Arc<RwLock<FxHashMap<Variant, Variant>>>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn insert(&self, key: Variant, value: Variant) -> Option<Variant> {
        self.0.write().insert(key, value)
    }

    pub fn get(&self, key: &Variant) -> Option<Variant> {
        self.0.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &Variant) -> bool {
        self.0.read().contains_key(key)
    }

    pub fn remove(&self, key: &Variant) -> Option<Variant> {
        self.0.write().remove(key)
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    pub fn keys(&self) -> Vec<Variant> {
        self.0.read().keys().cloned().collect()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<(Variant, Variant)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn same_as(&self, other: &Dictionary) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn alias_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn duplicate(&self, deep: bool) -> Self {
        if !deep {
            return Self(Arc::new(RwLock::new(self.0.read().clone())));
        }
        let Some(_level) = Nesting::enter() else {
            tracing::warn!(max = MAX_NESTING, "deep duplicate hit the nesting limit");
            return Self::new();
        };
        let map = self.0.read_recursive();
        map.iter()
            .map(|(k, v)| (k.duplicate(true), v.duplicate(true)))
            .collect()
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        if self.same_as(other) {
            return true;
        }
        let Some(_level) = Nesting::enter() else {
            return true;
        };
        *self.0.read_recursive() == *other.0.read_recursive()
    }
}

impl Eq for Dictionary {}

impl Hash for Dictionary {
    // Order independent: equal maps may iterate differently.
    fn hash<H: Hasher>(&self, state: &mut H) {
        let Some(_level) = Nesting::enter() else {
            return;
        };
        let map = self.0.read_recursive();
        let mut acc = 0u64;
        for (k, v) in map.iter() {
            let mut entry = FxHasher::default();
            k.hash(&mut entry);
            v.hash(&mut entry);
            acc = acc.wrapping_add(entry.finish());
        }
        map.len().hash(state);
        acc.hash(state);
    }
}

impl FromIterator<(Variant, Variant)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (Variant, Variant)>>(iter: I) -> Self {
        Self(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_level) = Nesting::enter() else {
            return f.write_str("{...}");
        };
        f.debug_map().entries(self.0.read_recursive().iter()).finish()
    }
}

// ============================================================================
// PackedArray
// ============================================================================

/// Typed, copy-on-write buffer.
#[derive(Clone, PartialEq)]
pub struct PackedArray<T>(Arc<Vec<T>>);

impl<T> PackedArray<T> {
    pub fn new() -> Self {
        Self(Arc::new(Vec::new()))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    /// Whether both buffers currently share storage.
    pub fn shares_storage_with(&self, other: &PackedArray<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> PackedArray<T> {
    /// Mutable access, copying the buffer first if it is shared.
    pub fn make_mut(&mut self) -> &mut Vec<T> {
        Arc::make_mut(&mut self.0)
    }

    pub fn push(&mut self, value: T) {
        self.make_mut().push(value);
    }

    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Copy that never shares storage with `self`.
    pub fn duplicate(&self) -> Self {
        Self(Arc::new((*self.0).clone()))
    }
}

impl<T> Default for PackedArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for PackedArray<T> {
    fn from(items: Vec<T>) -> Self {
        Self(Arc::new(items))
    }
}

impl<T> FromIterator<T> for PackedArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl<T: fmt::Debug> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
