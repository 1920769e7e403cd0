//! Class bindings.
//!
//! A [`ClassBinding`] is the extension's description of one class: its
//! name, optional parent, flags, integer constants, constructor, the virtual
//! methods it overrides, and the properties, signals and notification and
//! text hooks it exposes. Bindings are built with [`ClassBuilder`] and handed
//! to the runtime during the registration phase.
//!
//! # Example
//!
//! ```ignore
//! let widget = ClassBuilder::new("Widget")
//!     .parent("Node")
//!     .constructor(|| Widget { size: 1.0 })
//!     .method("area", |w: f64, h: f64| w * h)
//!     .method("grow", |this: &mut Widget, by: f64| this.size += by)
//!     .constant("MAX_SIZE", 64)
//!     .property("size", |w: &Widget| w.size, |w: &mut Widget, size: f64| w.size = size)
//!     .signal("resized", [("size", VariantType::Float)])
//!     .build()?;
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use extbind_core::{CallError, FromVariant, IntoVariant, StringName, Variant, VariantType};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::CallContext;
use crate::error::RegistrationError;
use crate::flags::{ClassFlags, MethodFlags, PropertyUsage};
use crate::instance::InstanceState;
use crate::property::{NotificationHandler, PropertyBinding, SignalBinding, ToStringHandler};
use crate::virtual_fn::{IntoVirtualFn, VirtualFn};

/// Constructor producing fresh instance state.
pub type Constructor = Arc<dyn Fn() -> InstanceState + Send + Sync>;

/// Registered description of an extension class.
#[derive(Clone)]
pub struct ClassBinding {
    name: StringName,
    parent: Option<StringName>,
    flags: ClassFlags,
    methods: FxHashMap<StringName, VirtualFn>,
    constructor: Option<Constructor>,
    constants: Vec<(StringName, i64)>,
    properties: Vec<PropertyBinding>,
    signals: Vec<SignalBinding>,
    notification: Option<NotificationHandler>,
    to_string: Option<ToStringHandler>,
}

impl ClassBinding {
    pub fn name(&self) -> StringName {
        self.name
    }

    /// The class this one extends, registered or not.
    pub fn parent(&self) -> Option<StringName> {
        self.parent
    }

    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT)
    }

    /// Methods this class implements itself, without inherited ones.
    pub fn methods(&self) -> &FxHashMap<StringName, VirtualFn> {
        &self.methods
    }

    pub fn method(&self, name: StringName) -> Option<&VirtualFn> {
        self.methods.get(&name)
    }

    pub fn constants(&self) -> &[(StringName, i64)] {
        &self.constants
    }

    pub fn constant(&self, name: StringName) -> Option<i64> {
        self.constants
            .iter()
            .find(|(constant, _)| *constant == name)
            .map(|(_, value)| *value)
    }

    /// Properties this class declares itself, in declaration order.
    pub fn properties(&self) -> &[PropertyBinding] {
        &self.properties
    }

    pub fn property(&self, name: StringName) -> Option<&PropertyBinding> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn signals(&self) -> &[SignalBinding] {
        &self.signals
    }

    pub fn signal(&self, name: StringName) -> Option<&SignalBinding> {
        self.signals.iter().find(|s| s.name() == name)
    }

    pub(crate) fn notification_handler(&self) -> Option<&NotificationHandler> {
        self.notification.as_ref()
    }

    pub(crate) fn to_string_handler(&self) -> Option<&ToStringHandler> {
        self.to_string.as_ref()
    }

    /// Whether instances get constructed state, either from this class's
    /// own constructor or, once frozen into a dispatch table, one inherited
    /// from the nearest registered ancestor.
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub(crate) fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub(crate) fn inherit_constructor(&mut self, ctor: Constructor) {
        self.constructor.get_or_insert(ctor);
    }

    /// Build fresh instance state. Classes with no constructor anywhere in
    /// their registered ancestry get unit state.
    pub fn construct(&self) -> InstanceState {
        match &self.constructor {
            Some(ctor) => ctor(),
            None => Box::new(()),
        }
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(|m| m.as_str()).collect();
        methods.sort_unstable();
        f.debug_struct("ClassBinding")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("flags", &self.flags)
            .field("methods", &methods)
            .field("constants", &self.constants)
            .field("properties", &self.properties)
            .field("signals", &self.signals)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ClassBinding`].
///
/// Validation is deferred to [`build`](Self::build) so definitions read as a
/// single chain.
pub struct ClassBuilder {
    name: StringName,
    parent: Option<StringName>,
    flags: ClassFlags,
    methods: Vec<(StringName, VirtualFn)>,
    constructor: Option<Constructor>,
    constants: Vec<(StringName, i64)>,
    properties: Vec<PropertyBinding>,
    signals: Vec<SignalBinding>,
    notification: Option<NotificationHandler>,
    to_string: Option<ToStringHandler>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<StringName>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            flags: ClassFlags::EXPOSED,
            methods: Vec::new(),
            constructor: None,
            constants: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            notification: None,
            to_string: None,
        }
    }

    /// Set the parent class. The parent does not have to be an extension
    /// class; if it is, its methods become fallbacks for this class.
    pub fn parent(mut self, parent: impl Into<StringName>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark the class abstract: it can be subclassed but not instantiated.
    pub fn abstract_class(mut self) -> Self {
        self.flags.insert(ClassFlags::ABSTRACT);
        self
    }

    pub fn tool(mut self) -> Self {
        self.flags.insert(ClassFlags::TOOL);
        self
    }

    pub fn ref_counted(mut self) -> Self {
        self.flags.insert(ClassFlags::REF_COUNTED);
        self
    }

    /// Set the constructor run when the host instantiates the class.
    pub fn constructor<T, F>(mut self, ctor: F) -> Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move || Box::new(ctor()) as InstanceState));
        self
    }

    /// Add a typed virtual method.
    pub fn method<M>(mut self, name: impl Into<StringName>, f: impl IntoVirtualFn<M>) -> Self {
        self.methods.push((name.into(), f.into_virtual_fn()));
        self
    }

    /// Add a typed virtual method with explicit flags.
    pub fn method_with_flags<M>(
        mut self,
        name: impl Into<StringName>,
        flags: MethodFlags,
        f: impl IntoVirtualFn<M>,
    ) -> Self {
        self.methods
            .push((name.into(), f.into_virtual_fn().with_flags(flags)));
        self
    }

    /// Add a method that works on the call context directly and checks its
    /// own arguments.
    pub fn raw_method<F>(mut self, name: impl Into<StringName>, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_, '_>) -> Result<Variant, CallError> + Send + Sync + 'static,
    {
        self.methods.push((name.into(), VirtualFn::new(None, f)));
        self
    }

    /// Add an integer constant.
    pub fn constant(mut self, name: impl Into<StringName>, value: i64) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    /// Expose a field of the instance state as a read/write property,
    /// stored and shown in the editor.
    pub fn property<T, V, G, S>(self, name: impl Into<StringName>, get: G, set: S) -> Self
    where
        T: Any,
        V: IntoVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.property_with_usage(name, PropertyUsage::default(), get, set)
    }

    /// [`property`](Self::property) with explicit usage flags.
    pub fn property_with_usage<T, V, G, S>(
        mut self,
        name: impl Into<StringName>,
        usage: PropertyUsage,
        get: G,
        set: S,
    ) -> Self
    where
        T: Any,
        V: IntoVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let property = PropertyBinding::typed(name.into(), get)
            .with_setter(set)
            .with_usage(usage);
        self.properties.push(property);
        self
    }

    /// Expose a computed or immutable value. Writes from the host fail.
    pub fn read_only_property<T, V, G>(mut self, name: impl Into<StringName>, get: G) -> Self
    where
        T: Any,
        V: IntoVariant + FromVariant,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.properties.push(PropertyBinding::typed(name.into(), get));
        self
    }

    /// Declare a signal with named, typed arguments.
    pub fn signal(
        mut self,
        name: impl Into<StringName>,
        args: impl IntoIterator<Item = (impl Into<StringName>, VariantType)>,
    ) -> Self {
        self.signals.push(SignalBinding::new(name, args));
        self
    }

    /// Handle host notifications. Handlers of registered ancestors run too,
    /// in the order the host asks for.
    pub fn on_notification<T, F>(mut self, f: F) -> Self
    where
        T: Any,
        F: Fn(&mut T, i32) + Send + Sync + 'static,
    {
        self.notification = Some(Arc::new(move |this, what| {
            if let Some(this) = this.downcast_mut::<T>() {
                f(this, what);
            }
        }));
        self
    }

    /// Give instances a text form instead of the host's default.
    pub fn to_string_with<T, F>(mut self, f: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.to_string = Some(Arc::new(move |this| this.downcast_ref::<T>().map(&f)));
        self
    }

    /// Validate and produce the binding.
    pub fn build(self) -> Result<ClassBinding, RegistrationError> {
        let class = self.name;
        if class.as_str().is_empty() {
            return Err(RegistrationError::InvalidClass {
                class,
                reason: "class name is empty",
            });
        }
        if self.parent == Some(class) {
            return Err(RegistrationError::InheritanceCycle(class));
        }

        let mut methods = FxHashMap::default();
        for (method, function) in self.methods {
            if methods.insert(method, function).is_some() {
                return Err(RegistrationError::DuplicateMethod { class, method });
            }
        }

        let mut seen = FxHashSet::default();
        for (constant, _) in &self.constants {
            if !seen.insert(*constant) {
                return Err(RegistrationError::DuplicateConstant {
                    class,
                    constant: *constant,
                });
            }
        }

        let mut seen = FxHashSet::default();
        for property in &self.properties {
            if !seen.insert(property.name()) {
                return Err(RegistrationError::DuplicateProperty {
                    class,
                    property: property.name(),
                });
            }
        }

        let mut seen = FxHashSet::default();
        for signal in &self.signals {
            if !seen.insert(signal.name()) {
                return Err(RegistrationError::DuplicateSignal {
                    class,
                    signal: signal.name(),
                });
            }
        }

        Ok(ClassBinding {
            name: class,
            parent: self.parent,
            flags: self.flags,
            methods,
            constructor: self.constructor,
            constants: self.constants,
            properties: self.properties,
            signals: self.signals,
            notification: self.notification,
            to_string: self.to_string,
        })
    }
}
