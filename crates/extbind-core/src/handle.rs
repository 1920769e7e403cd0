//! Handle & ownership registry.
//!
//! Every opaque native handle held by extension code is recorded here with
//! its ownership kind and (optionally) its class. Entries live in a
//! generational arena: releasing an entry bumps the slot's generation, so a
//! token issued before the release can never be confused with a later entry
//! that happens to reuse the same slot, even when the host hands back the
//! same raw pointer value.
//!
//! The registry does not break reference cycles between shared handles.
//! Objects that keep each other alive through shared handles stay alive until
//! extension code releases one side; such entries are listed by
//! [`HandleRegistry::live_entries`] at teardown.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::HandleError;
use crate::string_name::StringName;

/// A native object handle exactly as the host passes it.
///
/// Carries no type information. Zero is the null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RawHandle(u64);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        RawHandle(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        RawHandle(ptr as usize as u64)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Who is responsible for releasing the native resource behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Extension code must destroy the object exactly once.
    Owned,
    /// Valid for the current call only. Releasing performs no native call.
    Borrowed,
    /// Intrusively reference counted on the native side.
    Shared,
}

/// Registry-issued identity of a live entry.
///
/// Tokens are `Copy` and comparable; two tokens are equal only if they name
/// the same slot *and* the same generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single machine word for the wire: generation in the high
    /// half, slot index in the low half.
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Token {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Native-side lifetime operations the registry drives.
///
/// Implemented by the host function table in production and by counting
/// fakes in tests.
pub trait NativeLifecycle: Send + Sync {
    /// Destroy a native object.
    fn destroy(&self, raw: RawHandle);

    /// Increment the native refcount. Returns `false` if the object is
    /// already gone.
    fn reference(&self, raw: RawHandle) -> bool;

    /// Decrement the native refcount. Returns `true` if this dropped the last
    /// reference, in which case the registry destroys the object.
    fn unreference(&self, raw: RawHandle) -> bool;
}

/// What the registry knows about a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub raw: RawHandle,
    pub ownership: Ownership,
    pub class: Option<StringName>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
    /// Set once the generation counter is exhausted. A retired slot is never
    /// handed out again.
    retired: bool,
}

impl Slot {
    /// Whether `generation` has been handed out for this slot.
    fn issued(&self, generation: u32) -> bool {
        generation < self.generation
            || (generation == self.generation && (self.entry.is_some() || self.retired))
    }
}

impl Arena {
    fn insert(&mut self, entry: Entry) -> Token {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            Token {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
                retired: false,
            });
            Token {
                index,
                generation: 0,
            }
        }
    }

    fn get(&self, token: Token) -> Result<&Entry, HandleError> {
        let slot = self
            .slots
            .get(token.index as usize)
            .ok_or(HandleError::UnknownToken { token })?;
        match &slot.entry {
            Some(entry) if slot.generation == token.generation => Ok(entry),
            _ if slot.issued(token.generation) => Err(HandleError::StaleToken { token }),
            _ => Err(HandleError::UnknownToken { token }),
        }
    }

    fn remove(&mut self, token: Token) -> Result<Entry, HandleError> {
        let slot = self
            .slots
            .get_mut(token.index as usize)
            .ok_or(HandleError::UnknownToken { token })?;
        if slot.generation != token.generation || slot.entry.is_none() {
            return Err(if slot.issued(token.generation) {
                HandleError::DoubleRelease { token }
            } else {
                HandleError::UnknownToken { token }
            });
        }

        let entry = slot.entry.take().ok_or(HandleError::DoubleRelease { token })?;
        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                self.free_list.push(token.index);
            }
            None => {
                slot.retired = true;
                tracing::debug!(index = token.index, "slot generations exhausted, retiring slot");
            }
        }
        self.live -= 1;
        Ok(entry)
    }
}

/// Tracks ownership and lifetime of native handles held by extension code.
///
/// All mutation goes through one mutex, so acquire and release of distinct
/// handles from different threads keep the generation counters consistent.
/// Native lifecycle calls happen outside the lock.
pub struct HandleRegistry {
    arena: Mutex<Arena>,
    lifecycle: Arc<dyn NativeLifecycle>,
}

impl HandleRegistry {
    pub fn new(lifecycle: Arc<dyn NativeLifecycle>) -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            lifecycle,
        }
    }

    /// Record a new live entry for `raw`.
    ///
    /// For [`Ownership::Shared`] the native refcount is incremented first; a
    /// rejected increment is reported as [`HandleError::StaleHandle`].
    pub fn acquire(&self, raw: RawHandle, ownership: Ownership) -> Result<Token, HandleError> {
        self.acquire_entry(Entry {
            raw,
            ownership,
            class: None,
        })
    }

    /// Like [`acquire`](Self::acquire), also recording the handle's class.
    pub fn acquire_typed(
        &self,
        raw: RawHandle,
        ownership: Ownership,
        class: StringName,
    ) -> Result<Token, HandleError> {
        self.acquire_entry(Entry {
            raw,
            ownership,
            class: Some(class),
        })
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn acquire_entry(&self, entry: Entry) -> Result<Token, HandleError> {
        if entry.raw.is_null() {
            return Err(HandleError::NullHandle);
        }
        if entry.ownership == Ownership::Shared && !self.lifecycle.reference(entry.raw) {
            tracing::debug!(raw = %entry.raw, "native refcount increment rejected");
            return Err(HandleError::StaleHandle { raw: entry.raw });
        }

        let token = self.arena.lock().insert(entry);
        tracing::debug!(%token, raw = %entry.raw, ownership = ?entry.ownership, "handle acquired");
        Ok(token)
    }

    /// Release the entry behind `token` exactly once.
    ///
    /// Owned handles are destroyed; shared handles drop one native reference
    /// and are destroyed if it was the last; borrowed handles are simply
    /// forgotten. A second release of the same token is reported as
    /// [`HandleError::DoubleRelease`] and performs no native call.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn release(&self, token: Token) -> Result<(), HandleError> {
        let entry = self.arena.lock().remove(token)?;
        tracing::debug!(%token, raw = %entry.raw, ownership = ?entry.ownership, "handle released");

        match entry.ownership {
            Ownership::Owned => self.lifecycle.destroy(entry.raw),
            Ownership::Shared => {
                if self.lifecycle.unreference(entry.raw) {
                    self.lifecycle.destroy(entry.raw);
                }
            }
            Ownership::Borrowed => {}
        }
        Ok(())
    }

    /// Look up the entry behind a live token.
    pub fn get(&self, token: Token) -> Result<Entry, HandleError> {
        self.arena.lock().get(token).copied()
    }

    /// Resolve a live token to the raw handle to put on the wire.
    pub fn raw(&self, token: Token) -> Result<RawHandle, HandleError> {
        self.get(token).map(|entry| entry.raw)
    }

    pub fn is_live(&self, token: Token) -> bool {
        self.arena.lock().get(token).is_ok()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.arena.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live entry, in slot order.
    pub fn live_entries(&self) -> Vec<(Token, Entry)> {
        let arena = self.arena.lock();
        arena
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.map(|entry| {
                    (
                        Token {
                            index: index as u32,
                            generation: slot.generation,
                        },
                        entry,
                    )
                })
            })
            .collect()
    }

    /// Run `f` with a non-owning view of `raw`.
    ///
    /// The view is not recorded anywhere. Its lifetime is bound to the
    /// closure, so it cannot be stored past the enclosing call.
    pub fn borrow<R>(&self, raw: RawHandle, f: impl for<'call> FnOnce(Borrowed<'call>) -> R) -> R {
        f(Borrowed {
            raw,
            _scope: PhantomData,
        })
    }

    pub fn lifecycle(&self) -> &Arc<dyn NativeLifecycle> {
        &self.lifecycle
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("HandleRegistry")
            .field("slot_count", &arena.slots.len())
            .field("free_count", &arena.free_list.len())
            .field("live", &arena.live)
            .finish()
    }
}

/// A scoped, untracked view of a native handle valid for one call.
#[derive(Clone, Copy)]
pub struct Borrowed<'call> {
    raw: RawHandle,
    _scope: PhantomData<fn(&'call ()) -> &'call ()>,
}

impl Borrowed<'_> {
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }
}

impl fmt::Debug for Borrowed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Borrowed({})", self.raw)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use rustc_hash::FxHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Native side double with per-object refcounts.
    #[derive(Default)]
    pub(crate) struct CountingLifecycle {
        pub destroyed: AtomicUsize,
        pub refs: PlMutex<FxHashMap<u64, u32>>,
        pub dead: PlMutex<Vec<u64>>,
    }

    impl CountingLifecycle {
        pub fn refcount(&self, raw: RawHandle) -> u32 {
            self.refs.lock().get(&raw.to_bits()).copied().unwrap_or(0)
        }
    }

    impl NativeLifecycle for CountingLifecycle {
        fn destroy(&self, raw: RawHandle) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            self.dead.lock().push(raw.to_bits());
        }

        fn reference(&self, raw: RawHandle) -> bool {
            if self.dead.lock().contains(&raw.to_bits()) {
                return false;
            }
            *self.refs.lock().entry(raw.to_bits()).or_insert(0) += 1;
            true
        }

        fn unreference(&self, raw: RawHandle) -> bool {
            let mut refs = self.refs.lock();
            let count = refs.entry(raw.to_bits()).or_insert(1);
            *count = count.saturating_sub(1);
            *count == 0
        }
    }

    fn registry() -> (Arc<CountingLifecycle>, HandleRegistry) {
        let lifecycle = Arc::new(CountingLifecycle::default());
        let registry = HandleRegistry::new(lifecycle.clone());
        (lifecycle, registry)
    }

    const RAW: RawHandle = RawHandle::from_bits(0x1000);

    #[test]
    fn owned_release_destroys_once() {
        let (native, registry) = registry();
        let token = registry.acquire(RAW, Ownership::Owned).unwrap();
        assert_eq!(registry.len(), 1);

        registry.release(token).unwrap();
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn second_release_is_detected() {
        let (native, registry) = registry();
        let token = registry.acquire(RAW, Ownership::Owned).unwrap();
        registry.release(token).unwrap();

        assert_eq!(
            registry.release(token),
            Err(HandleError::DoubleRelease { token })
        );
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reacquired_raw_value_gets_new_generation() {
        let (_native, registry) = registry();
        let first = registry.acquire(RAW, Ownership::Owned).unwrap();
        registry.release(first).unwrap();

        let second = registry.acquire(RAW, Ownership::Owned).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(second.generation() > first.generation());
        assert!(!registry.is_live(first));
        assert!(registry.is_live(second));
        assert_eq!(registry.get(first), Err(HandleError::StaleToken { token: first }));
    }

    #[test]
    fn exhausted_slot_is_retired_instead_of_wrapping() {
        let (_native, registry) = registry();
        let first = registry.acquire(RAW, Ownership::Owned).unwrap();
        registry.release(first).unwrap();
        registry.arena.lock().slots[0].generation = u32::MAX;

        let last = registry.acquire(RAW, Ownership::Owned).unwrap();
        assert_eq!(last.index(), 0);
        assert_eq!(last.generation(), u32::MAX);
        registry.release(last).unwrap();

        let next = registry.acquire(RAW, Ownership::Owned).unwrap();
        assert_ne!(next.index(), 0);
        assert_ne!(next, first);
        assert_ne!(next, last);
        assert!(!registry.is_live(first));
        assert_eq!(registry.get(last), Err(HandleError::StaleToken { token: last }));
        assert_eq!(
            registry.release(last),
            Err(HandleError::DoubleRelease { token: last })
        );
        assert!(registry.is_live(next));
    }

    #[test]
    fn unissued_generation_on_free_slot_is_unknown() {
        let (_native, registry) = registry();
        let first = registry.acquire(RAW, Ownership::Owned).unwrap();
        registry.release(first).unwrap();

        // Slot 0 is free at generation 1, which has not been issued yet.
        let future = Token::from_bits(1 << 32);
        assert_eq!(future.index(), 0);
        assert_eq!(registry.get(future), Err(HandleError::UnknownToken { token: future }));
        assert_eq!(
            registry.release(future),
            Err(HandleError::UnknownToken { token: future })
        );
    }

    #[test]
    fn stale_token_release_does_not_touch_new_entry() {
        let (native, registry) = registry();
        let first = registry.acquire(RAW, Ownership::Owned).unwrap();
        registry.release(first).unwrap();
        let second = registry.acquire(RAW, Ownership::Owned).unwrap();

        assert!(matches!(
            registry.release(first),
            Err(HandleError::DoubleRelease { .. })
        ));
        assert!(registry.is_live(second));
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_acquire_increments_refcount() {
        let (native, registry) = registry();
        let a = registry.acquire(RAW, Ownership::Shared).unwrap();
        let b = registry.acquire(RAW, Ownership::Shared).unwrap();
        assert_eq!(native.refcount(RAW), 2);

        registry.release(a).unwrap();
        assert_eq!(native.refcount(RAW), 1);
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 0);

        registry.release(b).unwrap();
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_refcount_is_stale_handle() {
        let (native, registry) = registry();
        native.dead.lock().push(RAW.to_bits());
        assert_eq!(
            registry.acquire(RAW, Ownership::Shared),
            Err(HandleError::StaleHandle { raw: RAW })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn borrowed_release_makes_no_native_call() {
        let (native, registry) = registry();
        let token = registry.acquire(RAW, Ownership::Borrowed).unwrap();
        registry.release(token).unwrap();
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(native.refcount(RAW), 0);
    }

    #[test]
    fn null_handle_is_rejected() {
        let (_native, registry) = registry();
        assert_eq!(
            registry.acquire(RawHandle::NULL, Ownership::Owned),
            Err(HandleError::NullHandle)
        );
    }

    #[test]
    fn unknown_token_is_reported() {
        let (_native, registry) = registry();
        let bogus = Token::from_bits(42);
        assert_eq!(
            registry.release(bogus),
            Err(HandleError::UnknownToken { token: bogus })
        );
    }

    #[test]
    fn typed_entries_record_class() {
        let (_native, registry) = registry();
        let class = StringName::new("Node");
        let token = registry.acquire_typed(RAW, Ownership::Owned, class).unwrap();
        let entry = registry.get(token).unwrap();
        assert_eq!(entry.class, Some(class));
        assert_eq!(registry.raw(token).unwrap(), RAW);
    }

    #[test]
    fn live_entries_lists_unreleased_handles() {
        let (_native, registry) = registry();
        let a = registry.acquire(RawHandle::from_bits(1), Ownership::Owned).unwrap();
        let b = registry.acquire(RawHandle::from_bits(2), Ownership::Shared).unwrap();
        registry.release(a).unwrap();

        let live = registry.live_entries();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, b);
        assert_eq!(live[0].1.ownership, Ownership::Shared);
    }

    #[test]
    fn token_bits_round_trip() {
        let (_native, registry) = registry();
        let token = registry.acquire(RAW, Ownership::Owned).unwrap();
        assert_eq!(Token::from_bits(token.to_bits()), token);
    }

    #[test]
    fn borrow_exposes_raw_for_the_call() {
        let (native, registry) = registry();
        let bits = registry.borrow(RAW, |view| view.raw().to_bits());
        assert_eq!(bits, RAW.to_bits());
        assert!(registry.is_empty());
        assert_eq!(native.refcount(RAW), 0);
    }

    #[test]
    fn concurrent_acquire_release_stays_consistent() {
        let (native, registry) = registry();
        let registry = Arc::new(registry);
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let raw = RawHandle::from_bits((t << 32) | (i + 1));
                        let token = registry.acquire(raw, Ownership::Owned).unwrap();
                        assert!(registry.is_live(token));
                        registry.release(token).unwrap();
                        assert!(!registry.is_live(token));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert!(registry.is_empty());
        assert_eq!(native.destroyed.load(Ordering::SeqCst), 1600);
    }
}
