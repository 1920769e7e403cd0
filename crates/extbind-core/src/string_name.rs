//! Interned identifiers and borrowed string views for the wire.
//!
//! The host distinguishes two string-like types:
//!
//! - an owned, growable string buffer, carried across the boundary as a
//!   [`StrRef`] (pointer + length) into a buffer that outlives the call, and
//! - an interned name ([`StringName`]) used for class names, method names and
//!   property keys so that equality is a single integer comparison.
//!
//! Names are interned into a process-wide table and never freed; identifiers
//! are a small, bounded set for the lifetime of an extension.

use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

static NAME_TABLE: OnceLock<RwLock<NameTable>> = OnceLock::new();

#[derive(Default)]
struct NameTable {
    ids: FxHashMap<&'static str, u32>,
    entries: Vec<NameEntry>,
}

struct NameEntry {
    text: &'static str,
    hash: u64,
}

impl NameTable {
    fn global() -> &'static RwLock<NameTable> {
        NAME_TABLE.get_or_init(|| RwLock::new(NameTable::default()))
    }
}

/// An interned identifier.
///
/// Two `StringName`s compare equal if and only if they were created from the
/// same text. Copying and comparing are O(1).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StringName(u32);

impl StringName {
    /// Intern `text`, returning its name.
    pub fn new(text: &str) -> Self {
        let table = NameTable::global();
        if let Some(&id) = table.read().ids.get(text) {
            return StringName(id);
        }

        let mut table = table.write();
        // Another thread may have interned the same text between the locks.
        if let Some(&id) = table.ids.get(text) {
            return StringName(id);
        }
        let text: &'static str = Box::leak(text.to_owned().into_boxed_str());
        let id = table.entries.len() as u32;
        table.entries.push(NameEntry {
            text,
            hash: xxh64(text.as_bytes(), 0),
        });
        table.ids.insert(text, id);
        StringName(id)
    }

    /// Look up an already-interned name without interning.
    pub fn lookup(text: &str) -> Option<Self> {
        NameTable::global().read().ids.get(text).copied().map(StringName)
    }

    /// The interned text.
    pub fn as_str(self) -> &'static str {
        NameTable::global().read().entries[self.0 as usize].text
    }

    /// Stable 64-bit hash of the text (identical across processes).
    pub fn stable_hash(self) -> u64 {
        NameTable::global().read().entries[self.0 as usize].hash
    }

    /// The raw interner id, as passed across the boundary.
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }

    /// Rebuild a name from a raw id received from the host.
    ///
    /// Returns `None` if no name was interned under `id`.
    pub fn from_id(id: u32) -> Option<Self> {
        let table = NameTable::global().read();
        ((id as usize) < table.entries.len()).then_some(StringName(id))
    }

    /// Borrow the text as a wire string.
    pub fn as_str_ref(self) -> StrRef<'static> {
        StrRef::new(self.as_str())
    }
}

impl From<&str> for StringName {
    fn from(text: &str) -> Self {
        StringName::new(text)
    }
}

impl fmt::Debug for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "&{:?}", self.as_str())
    }
}

impl fmt::Display for StringName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UTF-8 string view as it travels across the boundary.
///
/// Layout is `{ ptr, len }`, two machine words. The lifetime ties the view to
/// the buffer it was made from, so a view cannot outlive an extension-owned
/// string.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct StrRef<'a> {
    ptr: *const u8,
    len: usize,
    _marker: PhantomData<&'a str>,
}

// SAFETY: a StrRef is a shared borrow of immutable UTF-8 bytes.
unsafe impl Send for StrRef<'_> {}
unsafe impl Sync for StrRef<'_> {}

impl<'a> StrRef<'a> {
    /// View an extension-owned string.
    pub fn new(text: &'a str) -> Self {
        Self {
            ptr: text.as_ptr(),
            len: text.len(),
            _marker: PhantomData,
        }
    }

    /// Rebuild a view from raw parts received from the host.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes of valid UTF-8 that stay alive and
    /// unmodified for `'a`.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
        Self {
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The viewed text.
    pub fn as_str(&self) -> &'a str {
        if self.len == 0 {
            return "";
        }
        // SAFETY: constructed from a &'a str, or from raw parts whose caller
        // guaranteed UTF-8 validity for 'a.
        unsafe { std::str::from_utf8_unchecked(std::slice::from_raw_parts(self.ptr, self.len)) }
    }
}

impl fmt::Debug for StrRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
