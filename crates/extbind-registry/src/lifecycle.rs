//! Extension runtime and its lifecycle state machine.
//!
//! ```text
//! Uninitialized -> Registering -> Active -> ShuttingDown -> Terminated
//! ```
//!
//! Classes are appended while `Registering`. Finishing registration freezes
//! them into a [`DispatchTable`], which stays read-only for the whole `Active`
//! phase; dispatch and instance management are only legal then. Shutdown runs
//! cleanup hooks in reverse registration order, and termination drops the
//! table and reports whatever is still live.
//!
//! Dispatch on an instance holds that instance's lock for the duration of the
//! call, so an implementation must not re-enter the runtime on the same
//! instance. Property access, notifications and text conversion take the same
//! lock.
//!
//! [`call_virtual`](ExtensionRuntime::call_virtual) and
//! [`release_instance`](ExtensionRuntime::release_instance) are the forms the
//! host trampolines use: failures the host can be told about come back as a
//! [`CallError`], everything else is a contract violation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use extbind_core::{
    CallError, Entry, Frame, HandleRegistry, NativeLifecycle, StringName, Token, Variant,
    contract,
};
use parking_lot::Mutex;

use crate::class::ClassBinding;
use crate::config::{ExtensionConfig, LeakPolicy};
use crate::context::CallContext;
use crate::dispatch::DispatchTable;
use crate::error::{DispatchError, RegistrationError};
use crate::instance::{Instance, InstanceId, InstanceStore};

/// Where the runtime is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Registering,
    Active,
    ShuttingDown,
    Terminated,
}

/// What was still live when the runtime terminated.
#[derive(Debug, Default)]
pub struct LeakReport {
    /// Extension instances the host never freed.
    pub instances: usize,
    /// Handle registry entries never released.
    pub handles: Vec<(Token, Entry)>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.instances == 0 && self.handles.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instance(s) and {} handle(s) still live",
            self.instances,
            self.handles.len()
        )
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Process-wide extension state: registered classes, live instances and the
/// handle registry.
pub struct ExtensionRuntime {
    config: ExtensionConfig,
    state: LifecycleState,
    pending: Vec<ClassBinding>,
    table: Option<Arc<DispatchTable>>,
    instances: InstanceStore,
    registry: Arc<HandleRegistry>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl ExtensionRuntime {
    pub fn new(config: ExtensionConfig, lifecycle: Arc<dyn NativeLifecycle>) -> Self {
        Self {
            config,
            state: LifecycleState::Uninitialized,
            pending: Vec::new(),
            table: None,
            instances: InstanceStore::new(),
            registry: Arc::new(HandleRegistry::new(lifecycle)),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    /// The frozen table, once registration has finished.
    pub fn table(&self) -> Option<&Arc<DispatchTable>> {
        self.table.as_ref()
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) -> Result<(), RegistrationError> {
        if self.state != from {
            return Err(RegistrationError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::info!(?from, ?to, "lifecycle transition");
        self.state = to;
        Ok(())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Open the class table for population.
    #[tracing::instrument(skip(self))]
    pub fn begin_registration(&mut self) -> Result<(), RegistrationError> {
        self.transition(LifecycleState::Uninitialized, LifecycleState::Registering)
    }

    /// Append a class. Only legal while registering.
    pub fn register_class(&mut self, binding: ClassBinding) -> Result<(), RegistrationError> {
        let class = binding.name();
        if self.state != LifecycleState::Registering {
            return Err(RegistrationError::NotRegistering {
                class,
                state: self.state,
            });
        }
        if self.pending.iter().any(|b| b.name() == class) {
            return Err(RegistrationError::DuplicateClass(class));
        }
        tracing::debug!(%class, parent = ?binding.parent(), methods = binding.methods().len(), "registered class");
        self.pending.push(binding);
        Ok(())
    }

    /// Add a hook to run during shutdown. Hooks run in reverse order.
    pub fn on_cleanup(&mut self, hook: impl FnOnce() + Send + 'static) -> Result<(), RegistrationError> {
        match self.state {
            LifecycleState::ShuttingDown | LifecycleState::Terminated => {
                Err(RegistrationError::Closed(self.state))
            }
            _ => {
                self.cleanups.get_mut().push(Box::new(hook));
                Ok(())
            }
        }
    }

    /// Freeze the registered classes and go active.
    ///
    /// If the classes do not form a valid table the runtime stays in
    /// `Registering` with its classes intact.
    #[tracing::instrument(skip(self))]
    pub fn finish_registration(&mut self) -> Result<Arc<DispatchTable>, RegistrationError> {
        if self.state != LifecycleState::Registering {
            return Err(RegistrationError::InvalidTransition {
                from: self.state,
                to: LifecycleState::Active,
            });
        }
        let table = Arc::new(DispatchTable::freeze(self.pending.clone())?);
        self.pending.clear();
        self.table = Some(Arc::clone(&table));
        self.transition(LifecycleState::Registering, LifecycleState::Active)?;
        Ok(table)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn active_table(&self) -> Result<&Arc<DispatchTable>, DispatchError> {
        match (&self.table, self.state) {
            (Some(table), LifecycleState::Active) => Ok(table),
            (_, state) => Err(DispatchError::NotActive(state)),
        }
    }

    /// Dispatch a call with no receiving instance.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn dispatch(
        &self,
        class: StringName,
        method: StringName,
        frame: &Frame<'_>,
    ) -> Result<Variant, DispatchError> {
        let table = self.active_table()?;
        self.call(table, class, method, None, frame)
    }

    /// Dispatch a call on a live instance, using the instance's class.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn dispatch_on(
        &self,
        instance: InstanceId,
        method: StringName,
        frame: &Frame<'_>,
    ) -> Result<Variant, DispatchError> {
        let table = self.active_table()?;
        let target = self
            .instances
            .get(instance)
            .ok_or(DispatchError::UnknownInstance(instance))?;
        let mut state = target.state.lock();
        self.call(table, target.class, method, Some(&mut **state), frame)
    }

    /// Dispatch a host call, on `instance` if given and statically on
    /// `class` otherwise.
    ///
    /// Implementation failures and unknown instances are returned for the
    /// host. A call the table cannot route at all (inactive runtime, unknown
    /// class, no implementation) means the host and the extension disagree
    /// about what was registered and is a contract violation.
    pub fn call_virtual(
        &self,
        class: StringName,
        instance: Option<InstanceId>,
        method: StringName,
        frame: &Frame<'_>,
    ) -> Result<Variant, CallError> {
        let outcome = match instance {
            Some(id) => self.dispatch_on(id, method, frame),
            None => self.dispatch(class, method, frame),
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(err @ (DispatchError::Call { .. } | DispatchError::UnknownInstance(_))) => {
                tracing::debug!(%err, "virtual call failed");
                Err(err.to_call_error())
            }
            Err(err) => contract::violation(err),
        }
    }

    fn call(
        &self,
        table: &DispatchTable,
        class: StringName,
        method: StringName,
        this: Option<&mut (dyn Any + Send)>,
        frame: &Frame<'_>,
    ) -> Result<Variant, DispatchError> {
        let resolved = table.resolve(class, method)?;
        tracing::trace!(%class, %method, owner = %resolved.owner, argc = frame.argc(), "dispatch");
        let mut ctx = CallContext::new(frame, this, class, method, &self.registry);
        resolved
            .function
            .call(&mut ctx)
            .map_err(|error| DispatchError::Call {
                class,
                method,
                error,
            })
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Construct extension state for a new instance of `class`.
    pub fn create_instance(&self, class: StringName) -> Result<InstanceId, DispatchError> {
        let table = self.active_table()?;
        let binding = table
            .class(class)
            .ok_or(DispatchError::UnknownClass(class))?;
        if binding.is_abstract() {
            return Err(DispatchError::AbstractClass(class));
        }
        let id = self.instances.allocate(class, binding.construct());
        tracing::debug!(%class, instance = %id, "created instance");
        Ok(id)
    }

    /// Drop an instance's state. Also legal while shutting down, when the
    /// host frees its remaining objects.
    pub fn free_instance(&self, id: InstanceId) -> Result<(), DispatchError> {
        match self.state {
            LifecycleState::Active | LifecycleState::ShuttingDown => {}
            state => return Err(DispatchError::NotActive(state)),
        }
        let instance = self
            .instances
            .free(id)
            .ok_or(DispatchError::UnknownInstance(id))?;
        tracing::debug!(class = %instance.class, instance = %id, "freed instance");
        Ok(())
    }

    /// Free an instance the host is done with. Freeing an instance that is
    /// not live is a contract violation.
    pub fn release_instance(&self, id: InstanceId) {
        contract::enforce(self.free_instance(id));
    }

    // ========================================================================
    // Properties and hooks
    // ========================================================================

    fn live(&self, id: InstanceId) -> Result<(&Arc<DispatchTable>, Instance), DispatchError> {
        let table = self.active_table()?;
        let instance = self.instances.get(id).ok_or(DispatchError::UnknownInstance(id))?;
        Ok((table, instance))
    }

    /// Read property `name` of a live instance.
    pub fn get_property(&self, id: InstanceId, name: StringName) -> Result<Variant, DispatchError> {
        let (table, instance) = self.live(id)?;
        let class = instance.class;
        let property = table.property(class, name)?;
        let state = instance.state.lock();
        property.get(&**state).map_err(|error| DispatchError::Call {
            class,
            method: name,
            error,
        })
    }

    /// Write property `name` of a live instance.
    pub fn set_property(&self, id: InstanceId, name: StringName, value: &Variant) -> Result<(), DispatchError> {
        let (table, instance) = self.live(id)?;
        let class = instance.class;
        let property = table.property(class, name)?;
        if property.is_read_only() {
            return Err(DispatchError::ReadOnlyProperty {
                class,
                property: name,
            });
        }
        let mut state = instance.state.lock();
        property.set(&mut **state, value).map_err(|error| DispatchError::Call {
            class,
            method: name,
            error,
        })?;
        tracing::trace!(%class, property = %name, "property set");
        Ok(())
    }

    /// Deliver notification `what` to every handler on the instance's class
    /// chain: root ancestor first, or most derived first with `reversed`.
    pub fn notify(&self, id: InstanceId, what: i32, reversed: bool) -> Result<(), DispatchError> {
        let (table, instance) = self.live(id)?;
        let chain = table.notification_chain(instance.class);
        let mut state = instance.state.lock();
        if reversed {
            chain.iter().rev().for_each(|handler| handler(&mut **state, what));
        } else {
            chain.iter().for_each(|handler| handler(&mut **state, what));
        }
        Ok(())
    }

    /// The instance's text form, if its class chain defines one.
    pub fn to_string(&self, id: InstanceId) -> Result<Option<String>, DispatchError> {
        let (table, instance) = self.live(id)?;
        let Some(handler) = table.to_string_handler(instance.class) else {
            return Ok(None);
        };
        let state = instance.state.lock();
        Ok(handler(&**state))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop dispatching and run cleanup hooks, newest first.
    #[tracing::instrument(skip(self))]
    pub fn begin_shutdown(&mut self) -> Result<(), RegistrationError> {
        self.transition(LifecycleState::Active, LifecycleState::ShuttingDown)?;
        let hooks = std::mem::take(self.cleanups.get_mut());
        for hook in hooks.into_iter().rev() {
            hook();
        }
        Ok(())
    }

    /// Drop the dispatch table and report anything still live.
    ///
    /// Shared handles caught in a reference cycle are never released and
    /// show up here as leaks.
    #[tracing::instrument(skip(self))]
    pub fn terminate(&mut self) -> Result<LeakReport, RegistrationError> {
        self.transition(LifecycleState::ShuttingDown, LifecycleState::Terminated)?;
        self.table = None;

        let report = LeakReport {
            instances: self.instances.clear(),
            handles: self.registry.live_entries(),
        };
        if report.is_clean() {
            return Ok(report);
        }

        match self.config.leak_policy() {
            LeakPolicy::Ignore => {}
            LeakPolicy::Warn => {
                if report.instances > 0 {
                    tracing::warn!(count = report.instances, "instances never freed by the host");
                }
                for (token, entry) in &report.handles {
                    tracing::warn!(
                        %token,
                        raw = %entry.raw,
                        ownership = ?entry.ownership,
                        class = ?entry.class,
                        "handle still live at termination"
                    );
                }
            }
            LeakPolicy::Fatal => contract::violation(&report),
        }
        Ok(report)
    }
}

impl fmt::Debug for ExtensionRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRuntime")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("table", &self.table)
            .field("instances", &self.instances)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassBuilder;
    use crate::testing::NullLifecycle;
    use extbind_core::{CallError, CallErrorKind, Ownership, RawHandle};
    use std::sync::Mutex;

    fn runtime() -> ExtensionRuntime {
        ExtensionRuntime::new(ExtensionConfig::default(), Arc::new(NullLifecycle))
    }

    fn name(text: &str) -> StringName {
        StringName::new(text)
    }

    struct Counter {
        value: i64,
    }

    fn active(classes: Vec<ClassBinding>) -> ExtensionRuntime {
        let mut rt = runtime();
        rt.begin_registration().unwrap();
        for class in classes {
            rt.register_class(class).unwrap();
        }
        rt.finish_registration().unwrap();
        rt
    }

    #[test]
    fn full_lifecycle() {
        let mut rt = runtime();
        assert_eq!(rt.state(), LifecycleState::Uninitialized);
        rt.begin_registration().unwrap();
        rt.register_class(ClassBuilder::new("A").build().unwrap()).unwrap();
        let table = rt.finish_registration().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(rt.state(), LifecycleState::Active);
        rt.begin_shutdown().unwrap();
        let report = rt.terminate().unwrap();
        assert!(report.is_clean());
        assert_eq!(rt.state(), LifecycleState::Terminated);
        assert!(rt.table().is_none());
    }

    #[test]
    fn transitions_out_of_order_fail() {
        let mut rt = runtime();
        assert_eq!(
            rt.finish_registration().unwrap_err(),
            RegistrationError::InvalidTransition {
                from: LifecycleState::Uninitialized,
                to: LifecycleState::Active,
            }
        );
        rt.begin_registration().unwrap();
        assert!(rt.begin_registration().is_err());
        assert!(rt.begin_shutdown().is_err());
    }

    #[test]
    fn register_after_active_is_rejected() {
        let mut rt = active(vec![]);
        let err = rt
            .register_class(ClassBuilder::new("Late").build().unwrap())
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::NotRegistering {
                class: name("Late"),
                state: LifecycleState::Active,
            }
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut rt = runtime();
        rt.begin_registration().unwrap();
        rt.register_class(ClassBuilder::new("A").build().unwrap()).unwrap();
        assert_eq!(
            rt.register_class(ClassBuilder::new("A").build().unwrap()),
            Err(RegistrationError::DuplicateClass(name("A")))
        );
    }

    #[test]
    fn failed_freeze_stays_registering() {
        let mut rt = runtime();
        rt.begin_registration().unwrap();
        rt.register_class(ClassBuilder::new("X").parent("Y").build().unwrap()).unwrap();
        rt.register_class(ClassBuilder::new("Y").parent("X").build().unwrap()).unwrap();
        assert!(matches!(
            rt.finish_registration(),
            Err(RegistrationError::InheritanceCycle(_))
        ));
        assert_eq!(rt.state(), LifecycleState::Registering);
    }

    #[test]
    fn dispatch_requires_active() {
        let rt = runtime();
        let frame = Frame::new(0);
        assert_eq!(
            rt.dispatch(name("A"), name("m"), &frame),
            Err(DispatchError::NotActive(LifecycleState::Uninitialized))
        );
    }

    #[test]
    fn widget_area() {
        let rt = active(vec![ClassBuilder::new("Widget")
            .method("area", |w: f64, h: f64| w * h)
            .build()
            .unwrap()]);
        let mut frame = Frame::new(2);
        frame.put_arg(0, 3.0f64).put_arg(1, 4.0f64);
        let result = rt.dispatch(name("Widget"), name("area"), &frame).unwrap();
        assert_eq!(result.unpack::<f64>(), Ok(12.0));
    }

    #[test]
    fn dispatch_falls_back_to_parent() {
        let rt = active(vec![
            ClassBuilder::new("A").method("m", || "from A").build().unwrap(),
            ClassBuilder::new("B").parent("A").build().unwrap(),
        ]);
        let result = rt.dispatch(name("B"), name("m"), &Frame::new(0)).unwrap();
        assert_eq!(result.unpack::<String>(), Ok("from A".to_string()));
    }

    #[test]
    fn implementation_errors_carry_context() {
        let rt = active(vec![ClassBuilder::new("Widget")
            .method("area", |w: f64, h: f64| w * h)
            .build()
            .unwrap()]);
        let err = rt
            .dispatch(name("Widget"), name("area"), &Frame::new(1))
            .unwrap_err();
        assert_eq!(err.to_call_error().kind, CallErrorKind::TooFewArguments);
        assert!(err.to_string().contains("Widget::area"));
    }

    #[test]
    fn instance_state_persists_across_calls() {
        let rt = active(vec![ClassBuilder::new("Counter")
            .constructor(|| Counter { value: 10 })
            .method("bump", |this: &mut Counter, by: i64| {
                this.value += by;
                this.value
            })
            .build()
            .unwrap()]);

        let id = rt.create_instance(name("Counter")).unwrap();
        let mut frame = Frame::new(1);
        frame.put_arg(0, 5i64);
        assert_eq!(rt.dispatch_on(id, name("bump"), &frame), Ok(Variant::Int(15)));
        assert_eq!(rt.dispatch_on(id, name("bump"), &frame), Ok(Variant::Int(20)));

        rt.free_instance(id).unwrap();
        assert_eq!(
            rt.dispatch_on(id, name("bump"), &frame),
            Err(DispatchError::UnknownInstance(id))
        );
        assert_eq!(rt.free_instance(id), Err(DispatchError::UnknownInstance(id)));
    }

    #[test]
    fn receiver_method_without_instance() {
        let rt = active(vec![ClassBuilder::new("Counter")
            .method("get", |this: &mut Counter| this.value)
            .build()
            .unwrap()]);
        let err = rt
            .dispatch(name("Counter"), name("get"), &Frame::new(0))
            .unwrap_err();
        assert_eq!(err.to_call_error(), CallError::instance_is_null());
    }

    #[test]
    fn abstract_class_cannot_be_instantiated() {
        let rt = active(vec![ClassBuilder::new("Shape").abstract_class().build().unwrap()]);
        assert_eq!(
            rt.create_instance(name("Shape")),
            Err(DispatchError::AbstractClass(name("Shape")))
        );
        assert_eq!(
            rt.create_instance(name("Missing")),
            Err(DispatchError::UnknownClass(name("Missing")))
        );
    }

    #[test]
    fn subclass_without_constructor_reaches_inherited_state() {
        let rt = active(vec![
            ClassBuilder::new("Counter")
                .constructor(|| Counter { value: 7 })
                .method("get", |this: &mut Counter| this.value)
                .build()
                .unwrap(),
            ClassBuilder::new("Tally").parent("Counter").build().unwrap(),
        ]);
        let id = rt.create_instance(name("Tally")).unwrap();
        assert_eq!(rt.dispatch_on(id, name("get"), &Frame::new(0)), Ok(Variant::Int(7)));
    }

    fn unit_class() -> ClassBinding {
        ClassBuilder::new("Unit")
            .constructor(|| Counter { value: 10 })
            .property("hp", |c: &Counter| c.value, |c: &mut Counter, hp: i64| c.value = hp)
            .read_only_property("alive", |c: &Counter| c.value > 0)
            .on_notification(|c: &mut Counter, what: i32| c.value += i64::from(what))
            .to_string_with(|c: &Counter| format!("Unit({})", c.value))
            .build()
            .unwrap()
    }

    #[test]
    fn properties_read_and_write_instance_state() {
        let rt = active(vec![unit_class()]);
        let id = rt.create_instance(name("Unit")).unwrap();

        assert_eq!(rt.get_property(id, name("hp")), Ok(Variant::Int(10)));
        rt.set_property(id, name("hp"), &Variant::Int(0)).unwrap();
        assert_eq!(rt.get_property(id, name("alive")), Ok(Variant::Bool(false)));
        assert_eq!(
            rt.set_property(id, name("alive"), &Variant::Bool(true)),
            Err(DispatchError::ReadOnlyProperty {
                class: name("Unit"),
                property: name("alive"),
            })
        );
        assert_eq!(
            rt.get_property(id, name("mana")),
            Err(DispatchError::UnknownProperty {
                class: name("Unit"),
                property: name("mana"),
            })
        );
        let err = rt
            .set_property(id, name("hp"), &Variant::String("full".into()))
            .unwrap_err();
        assert_eq!(err.to_call_error().kind, CallErrorKind::InvalidArgument);
        assert_eq!(rt.get_property(id, name("hp")), Ok(Variant::Int(0)));

        rt.free_instance(id).unwrap();
        assert_eq!(
            rt.get_property(id, name("hp")),
            Err(DispatchError::UnknownInstance(id))
        );
    }

    #[test]
    fn notifications_follow_the_requested_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (base, leaf) = (Arc::clone(&order), Arc::clone(&order));
        let rt = active(vec![
            ClassBuilder::new("Base")
                .constructor(|| Counter { value: 0 })
                .on_notification(move |_: &mut Counter, what: i32| base.lock().unwrap().push(("base", what)))
                .build()
                .unwrap(),
            ClassBuilder::new("Leaf")
                .parent("Base")
                .on_notification(move |_: &mut Counter, what: i32| leaf.lock().unwrap().push(("leaf", what)))
                .build()
                .unwrap(),
        ]);
        let id = rt.create_instance(name("Leaf")).unwrap();
        rt.notify(id, 1, false).unwrap();
        rt.notify(id, 2, true).unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec![("base", 1), ("leaf", 1), ("leaf", 2), ("base", 2)]
        );
    }

    #[test]
    fn text_form_uses_current_state() {
        let rt = active(vec![
            unit_class(),
            ClassBuilder::new("Plain").build().unwrap(),
        ]);
        let id = rt.create_instance(name("Unit")).unwrap();
        rt.notify(id, 5, false).unwrap();
        assert_eq!(rt.to_string(id), Ok(Some("Unit(15)".to_string())));

        let plain = rt.create_instance(name("Plain")).unwrap();
        assert_eq!(rt.to_string(plain), Ok(None));
    }

    #[test]
    fn call_virtual_reports_host_visible_failures() {
        let rt = active(vec![ClassBuilder::new("Counter")
            .constructor(|| Counter { value: 1 })
            .method("get", |this: &mut Counter| this.value)
            .build()
            .unwrap()]);
        let id = rt.create_instance(name("Counter")).unwrap();
        assert_eq!(
            rt.call_virtual(name("Counter"), Some(id), name("get"), &Frame::new(0)),
            Ok(Variant::Int(1))
        );
        assert_eq!(
            rt.call_virtual(name("Counter"), None, name("get"), &Frame::new(0)),
            Err(CallError::instance_is_null())
        );
        rt.release_instance(id);
        assert_eq!(
            rt.call_virtual(name("Counter"), Some(id), name("get"), &Frame::new(0)),
            Err(CallError::instance_is_null())
        );
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn unresolved_virtual_call_is_a_contract_violation() {
        let rt = active(vec![ClassBuilder::new("Counter").build().unwrap()]);
        let _ = rt.call_virtual(name("Counter"), None, name("missing"), &Frame::new(0));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn virtual_call_on_unknown_class_is_a_contract_violation() {
        let rt = active(vec![ClassBuilder::new("Counter").build().unwrap()]);
        let _ = rt.call_virtual(name("Ghost"), None, name("get"), &Frame::new(0));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn virtual_call_before_activation_is_a_contract_violation() {
        let rt = runtime();
        let _ = rt.call_virtual(name("Counter"), None, name("get"), &Frame::new(0));
    }

    #[test]
    #[should_panic(expected = "unknown instance")]
    fn releasing_an_unknown_instance_is_a_contract_violation() {
        let rt = active(vec![ClassBuilder::new("Counter").build().unwrap()]);
        let id = rt.create_instance(name("Counter")).unwrap();
        rt.release_instance(id);
        rt.release_instance(id);
    }

    #[test]
    fn cleanups_run_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rt = runtime();
        rt.begin_registration().unwrap();
        for i in 0..3 {
            let log = Arc::clone(&log);
            rt.on_cleanup(move || log.lock().unwrap().push(i)).unwrap();
        }
        rt.finish_registration().unwrap();
        rt.begin_shutdown().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);
        assert!(rt.on_cleanup(|| {}).is_err());
    }

    #[test]
    fn terminate_reports_leaks() {
        let mut rt = active(vec![ClassBuilder::new("A").build().unwrap()]);
        rt.create_instance(name("A")).unwrap();
        rt.registry()
            .acquire(RawHandle::from_bits(0x10), Ownership::Borrowed)
            .unwrap();
        rt.begin_shutdown().unwrap();
        let report = rt.terminate().unwrap();
        assert_eq!(report.instances, 1);
        assert_eq!(report.handles.len(), 1);
        assert!(rt.instances().is_empty());
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn fatal_leak_policy_panics() {
        let mut rt = ExtensionRuntime::new(
            ExtensionConfig::new().with_leak_policy(LeakPolicy::Fatal),
            Arc::new(NullLifecycle),
        );
        rt.begin_registration().unwrap();
        rt.finish_registration().unwrap();
        rt.registry()
            .acquire(RawHandle::from_bits(0x20), Ownership::Borrowed)
            .unwrap();
        rt.begin_shutdown().unwrap();
        let _ = rt.terminate();
    }
}
