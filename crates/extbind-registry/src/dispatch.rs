//! Frozen dispatch table.
//!
//! Built once when registration completes. Each class's virtual table is
//! flattened over its registered ancestors, nearest ancestor first, so that
//! resolving `(class, method)` is a single map lookup that still honours
//! single-inheritance fallback. Constructors are inherited the same way, so
//! a subclass without its own constructor builds its nearest ancestor's
//! state and the inherited methods can reach it.
//!
//! Properties are flattened too, root ancestor first, with a subclass
//! property replacing an inherited one of the same name in place. Every
//! registered ancestor's notification handler is kept, root first.

use std::fmt;

use extbind_core::StringName;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::class::{ClassBinding, Constructor};
use crate::error::{DispatchError, RegistrationError};
use crate::property::{NotificationHandler, PropertyBinding, ToStringHandler};
use crate::virtual_fn::VirtualFn;

/// A resolved virtual method.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Class whose implementation was selected.
    pub owner: StringName,
    pub function: VirtualFn,
}

struct ClassEntry {
    binding: ClassBinding,
    vtable: FxHashMap<StringName, Resolved>,
    properties: Vec<PropertyBinding>,
    notifications: Vec<NotificationHandler>,
    to_string: Option<ToStringHandler>,
}

/// Read-only class and method table used while the runtime is active.
pub struct DispatchTable {
    classes: FxHashMap<StringName, ClassEntry>,
    order: Vec<StringName>,
}

impl DispatchTable {
    /// Freeze a set of bindings, in registration order.
    pub fn freeze(bindings: Vec<ClassBinding>) -> Result<Self, RegistrationError> {
        let mut by_name: FxHashMap<StringName, ClassBinding> = FxHashMap::default();
        let mut order = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let name = binding.name();
            if by_name.insert(name, binding).is_some() {
                return Err(RegistrationError::DuplicateClass(name));
            }
            order.push(name);
        }

        for &name in &order {
            check_acyclic(&by_name, name)?;
        }

        let mut classes = FxHashMap::default();
        classes.reserve(order.len());
        for &name in &order {
            let vtable = flatten(&by_name, name);
            tracing::debug!(class = %name, methods = vtable.len(), "flattened virtual table");
            if let Some(binding) = by_name.get(&name) {
                let mut binding = binding.clone();
                if let Some(ctor) = inherited_constructor(&by_name, &binding) {
                    tracing::debug!(class = %name, "constructor inherited");
                    binding.inherit_constructor(ctor);
                }
                let chain = lineage(&by_name, name);
                let properties = flatten_properties(&chain);
                let notifications = chain
                    .iter()
                    .rev()
                    .filter_map(|b| b.notification_handler().cloned())
                    .collect();
                let to_string = chain.iter().find_map(|b| b.to_string_handler().cloned());
                classes.insert(
                    name,
                    ClassEntry {
                        binding,
                        vtable,
                        properties,
                        notifications,
                        to_string,
                    },
                );
            }
        }

        Ok(Self { classes, order })
    }

    /// Resolve `method` on `class`, falling back to the nearest registered
    /// ancestor that implements it.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn resolve(&self, class: StringName, method: StringName) -> Result<&Resolved, DispatchError> {
        let entry = self
            .classes
            .get(&class)
            .ok_or(DispatchError::UnknownClass(class))?;
        entry
            .vtable
            .get(&method)
            .ok_or(DispatchError::Unresolved { class, method })
    }

    /// Look up `property` on `class` or its registered ancestors.
    pub fn property(&self, class: StringName, property: StringName) -> Result<&PropertyBinding, DispatchError> {
        let entry = self
            .classes
            .get(&class)
            .ok_or(DispatchError::UnknownClass(class))?;
        entry
            .properties
            .iter()
            .find(|p| p.name() == property)
            .ok_or(DispatchError::UnknownProperty { class, property })
    }

    /// Properties of `class` including inherited ones, root ancestor first.
    pub fn properties_of(&self, class: StringName) -> &[PropertyBinding] {
        self.classes
            .get(&class)
            .map(|entry| entry.properties.as_slice())
            .unwrap_or_default()
    }

    /// Notification handlers of `class` and its ancestors, root first.
    pub fn notification_chain(&self, class: StringName) -> &[NotificationHandler] {
        self.classes
            .get(&class)
            .map(|entry| entry.notifications.as_slice())
            .unwrap_or_default()
    }

    /// The nearest text hook on `class` or its ancestors.
    pub fn to_string_handler(&self, class: StringName) -> Option<&ToStringHandler> {
        self.classes.get(&class).and_then(|entry| entry.to_string.as_ref())
    }

    pub fn class(&self, name: StringName) -> Option<&ClassBinding> {
        self.classes.get(&name).map(|entry| &entry.binding)
    }

    pub fn contains(&self, name: StringName) -> bool {
        self.classes.contains_key(&name)
    }

    /// Whether `class` is `ancestor` or inherits from it. The last parent in
    /// the chain may be a host class that was never registered.
    pub fn is_subclass_of(&self, class: StringName, ancestor: StringName) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.class(name).and_then(ClassBinding::parent);
        }
        false
    }

    /// Methods resolvable on `class`, including inherited ones.
    pub fn methods_of(&self, class: StringName) -> impl Iterator<Item = (StringName, &Resolved)> {
        self.classes
            .get(&class)
            .into_iter()
            .flat_map(|entry| entry.vtable.iter().map(|(name, resolved)| (*name, resolved)))
    }

    /// Class names in registration order.
    pub fn class_names(&self) -> &[StringName] {
        &self.order
    }

    /// Bindings in registration order.
    pub fn bindings(&self) -> impl DoubleEndedIterator<Item = &ClassBinding> {
        self.order.iter().filter_map(|name| self.class(*name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("classes", &self.order)
            .finish()
    }
}

fn check_acyclic(
    bindings: &FxHashMap<StringName, ClassBinding>,
    start: StringName,
) -> Result<(), RegistrationError> {
    let mut seen = FxHashSet::default();
    let mut current = Some(start);
    while let Some(name) = current {
        if !seen.insert(name) {
            return Err(RegistrationError::InheritanceCycle(name));
        }
        current = bindings.get(&name).and_then(ClassBinding::parent);
    }
    Ok(())
}

fn flatten(
    bindings: &FxHashMap<StringName, ClassBinding>,
    class: StringName,
) -> FxHashMap<StringName, Resolved> {
    let mut vtable = FxHashMap::default();
    let mut current = bindings.get(&class);
    while let Some(binding) = current {
        for (method, function) in binding.methods() {
            vtable.entry(*method).or_insert_with(|| Resolved {
                owner: binding.name(),
                function: function.clone(),
            });
        }
        current = binding.parent().and_then(|parent| bindings.get(&parent));
    }
    vtable
}

/// `class` followed by its registered ancestors, nearest first.
fn lineage(bindings: &FxHashMap<StringName, ClassBinding>, class: StringName) -> Vec<&ClassBinding> {
    let mut chain = Vec::new();
    let mut current = bindings.get(&class);
    while let Some(binding) = current {
        chain.push(binding);
        current = binding.parent().and_then(|parent| bindings.get(&parent));
    }
    chain
}

fn flatten_properties(chain: &[&ClassBinding]) -> Vec<PropertyBinding> {
    let mut properties: Vec<PropertyBinding> = Vec::new();
    for binding in chain.iter().rev() {
        for property in binding.properties() {
            match properties.iter_mut().find(|p| p.name() == property.name()) {
                Some(inherited) => *inherited = property.clone(),
                None => properties.push(property.clone()),
            }
        }
    }
    properties
}

fn inherited_constructor(
    bindings: &FxHashMap<StringName, ClassBinding>,
    binding: &ClassBinding,
) -> Option<Constructor> {
    if binding.constructor().is_some() {
        return None;
    }
    let mut current = binding.parent().and_then(|parent| bindings.get(&parent));
    while let Some(ancestor) = current {
        if let Some(ctor) = ancestor.constructor() {
            return Some(ctor.clone());
        }
        current = ancestor.parent().and_then(|parent| bindings.get(&parent));
    }
    None
}
