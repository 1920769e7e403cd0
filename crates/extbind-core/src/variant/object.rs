use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::contract;
use crate::error::HandleError;
use crate::handle::{HandleRegistry, Ownership, RawHandle, Token};
use crate::string_name::StringName;

/// A registry-tracked object handle co-owned by one or more variants.
///
/// Clones share one registry entry. When the last clone is dropped the entry
/// is released (destroying or unreferencing the native object as its
/// ownership kind dictates) unless it was taken back with
/// [`into_token`](Self::into_token).
///
/// Releasing an entry that is no longer live (because it was released
/// through the registry directly, or because two independent `ObjectRef`s
/// were built from one token) is a double release and escalates as a
/// contract violation.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

struct ObjectInner {
    token: Token,
    raw: RawHandle,
    class: Option<StringName>,
    registry: Arc<HandleRegistry>,
    detached: bool,
}

impl ObjectRef {
    /// Take over responsibility for releasing `token`.
    ///
    /// The caller must not release `token` itself, nor wrap it a second
    /// time; clone the returned value to share it.
    pub fn from_token(registry: Arc<HandleRegistry>, token: Token) -> Result<Self, HandleError> {
        let entry = registry.get(token)?;
        Ok(Self(Arc::new(ObjectInner {
            token,
            raw: entry.raw,
            class: entry.class,
            registry,
            detached: false,
        })))
    }

    /// Acquire `raw` in `registry` and wrap the new entry.
    pub fn acquire(
        registry: Arc<HandleRegistry>,
        raw: RawHandle,
        ownership: Ownership,
        class: Option<StringName>,
    ) -> Result<Self, HandleError> {
        let token = match class {
            Some(class) => registry.acquire_typed(raw, ownership, class)?,
            None => registry.acquire(raw, ownership)?,
        };
        Self::from_token(registry, token)
    }

    pub fn token(&self) -> Token {
        self.0.token
    }

    pub fn raw(&self) -> RawHandle {
        self.0.raw
    }

    pub fn class(&self) -> Option<StringName> {
        self.0.class
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.0.registry
    }

    /// Whether the registry entry is still live.
    pub fn is_live(&self) -> bool {
        self.0.registry.is_live(self.0.token)
    }

    /// Give up co-ownership and return the token without releasing it.
    ///
    /// Fails (returning `self`) while other clones still share the entry.
    pub fn into_token(self) -> Result<Token, ObjectRef> {
        match Arc::try_unwrap(self.0) {
            Ok(mut inner) => {
                inner.detached = true;
                Ok(inner.token)
            }
            Err(shared) => Err(ObjectRef(shared)),
        }
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Err(err) = self.registry.release(self.token) {
            contract::violation(format_args!("object variant for {}: {err}", self.raw));
        }
    }
}

/// Identity is the native object, not the registry entry.
impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw == other.0.raw
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.raw.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("token", &self.0.token)
            .field("raw", &self.0.raw)
            .field("class", &self.0.class)
            .finish()
    }
}
