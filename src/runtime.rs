//! Runtime context
//!
//! Everything generated components share while they run: named stores, action
//! groups, hook sets, the custom-element registry and the document they render
//! into. A [`Runtime`] is a cheap handle passed explicitly to every instance;
//! there is no process-wide state. Call [`Runtime::teardown`] to disconnect
//! every live instance before dropping the last handle.

use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use crate::codegen::ComponentDefinition;
use crate::component::{
    CustomElement, FunctionComponent, FunctionElement, MarkupClass, MarkupElement, RenderContext,
};
use crate::config::Mode;
use crate::document::{Dom, NodeId};
use crate::events::EventHandler;
use crate::parse::Dialect;
use crate::store::{
    HookFn, HookId, InstanceId, NamedStore, NotifyPolicy, StoreAction, Subscriber,
};
use crate::widget::{WidgetElement, WidgetFactory};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("`{0}` is not a valid custom element name")]
    InvalidName(String),

    #[error("custom element `{0}` is already defined")]
    AlreadyDefined(String),

    #[error("unknown store `{0}`")]
    UnknownStore(String),

    #[error("unknown actions group `{0}`")]
    UnknownActions(String),

    #[error("unknown action `{group}.{action}`")]
    UnknownAction { group: String, action: String },

    #[error("no function provided for entry point `{0}`")]
    MissingEntryPoint(String),

    #[error("`{factory}` is reserved for global definition files and cannot be called inside {component}")]
    ReservedInComponent { factory: String, component: String },
}

/// Action registered through `createActions`.
pub type GroupAction = Rc<dyn Fn(&Runtime, &[Value]) -> Value>;

/// Builds the instance backing a freshly connected host element.
pub type ElementFactory = Rc<dyn Fn(&Runtime, NodeId) -> Rc<dyn CustomElement>>;

#[derive(Clone)]
pub struct ElementClass {
    pub class_name: String,
    pub observed_attributes: Vec<String>,
    factory: ElementFactory,
}

impl ElementClass {
    pub fn new(class_name: &str, observed_attributes: Vec<String>, factory: ElementFactory) -> Self {
        Self {
            class_name: class_name.to_string(),
            observed_attributes,
            factory,
        }
    }
}

impl std::fmt::Debug for ElementClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementClass")
            .field("class_name", &self.class_name)
            .field("observed_attributes", &self.observed_attributes)
            .finish()
    }
}

/// The component whose code is currently running. Store reads made while it
/// is set subscribe it to the store.
#[derive(Clone)]
pub struct ComponentContext {
    pub id: InstanceId,
    pub name: String,
    pub subscriber: Weak<dyn Subscriber>,
    pub subscriptions: Rc<RefCell<BTreeSet<String>>>,
}

/// Input of the merge-style setter.
pub enum StoreUpdate {
    Merge(Map<String, Value>),
    Updater(Box<dyn FnOnce(&Value) -> Value>),
}

/// Hooks registered on one store through `createHooks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSet {
    pub store: String,
    pub hooks: Vec<(String, HookId)>,
}

impl HookSet {
    pub fn properties(&self) -> Vec<&str> {
        self.hooks.iter().map(|(p, _)| p.as_str()).collect()
    }
}

const RESERVED_NAMES: &[&str] = &[
    "annotation-xml",
    "color-profile",
    "font-face",
    "font-face-src",
    "font-face-uri",
    "font-face-format",
    "font-face-name",
    "missing-glyph",
];

/// Custom element naming rules: a hyphen, a lowercase first letter, no
/// uppercase, and not one of the names SVG/MathML already use.
pub fn is_valid_custom_element_name(name: &str) -> bool {
    if !name.contains('-') {
        return false;
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }
    if RESERVED_NAMES.contains(&name) {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.')
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

struct RuntimeInner {
    mode: Mode,
    dom: Dom,
    stores: RefCell<BTreeMap<String, Rc<NamedStore>>>,
    action_groups: RefCell<BTreeMap<String, BTreeMap<String, GroupAction>>>,
    hook_sets: RefCell<BTreeMap<String, HookSet>>,
    current: RefCell<Vec<ComponentContext>>,
    registry: RefCell<BTreeMap<String, ElementClass>>,
    functions: RefCell<BTreeMap<String, FunctionComponent>>,
    handlers: RefCell<BTreeMap<String, EventHandler>>,
    instances: RefCell<HashMap<NodeId, Rc<dyn CustomElement>>>,
    next_instance: Cell<InstanceId>,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("mode", &self.inner.mode)
            .field("stores", &self.store_names())
            .field("defined", &self.defined_tags())
            .field("instances", &self.instance_count())
            .finish()
    }
}

/// Pops the current-component stack even if the guarded code panics.
struct CurrentGuard<'a>(&'a RuntimeInner);

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        self.0.current.borrow_mut().pop();
    }
}

impl Runtime {
    pub fn new(mode: Mode) -> Self {
        Self::with_dom(mode, Dom::new())
    }

    pub fn with_dom(mode: Mode, dom: Dom) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                mode,
                dom,
                stores: RefCell::new(BTreeMap::new()),
                action_groups: RefCell::new(BTreeMap::new()),
                hook_sets: RefCell::new(BTreeMap::new()),
                current: RefCell::new(Vec::new()),
                registry: RefCell::new(BTreeMap::new()),
                functions: RefCell::new(BTreeMap::new()),
                handlers: RefCell::new(BTreeMap::new()),
                instances: RefCell::new(HashMap::new()),
                next_instance: Cell::new(1),
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn dom(&self) -> &Dom {
        &self.inner.dom
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn next_instance_id(&self) -> InstanceId {
        let id = self.inner.next_instance.get();
        self.inner.next_instance.set(id + 1);
        id
    }

    // ─── current component ───────────────────────────────────────────────────

    pub fn with_component<R>(&self, context: ComponentContext, f: impl FnOnce() -> R) -> R {
        self.inner.current.borrow_mut().push(context);
        let _guard = CurrentGuard(&self.inner);
        f()
    }

    pub fn current_component(&self) -> Option<ComponentContext> {
        self.inner.current.borrow().last().cloned()
    }

    /// Subscribe the current component, if any, to `store`.
    fn track(&self, store: &Rc<NamedStore>) {
        let Some(context) = self.current_component() else {
            return;
        };
        if store.subscribe(context.subscriber.clone()) {
            tracing::debug!(store = %store.name(), component = %context.name, "component subscribed to store");
        }
        context
            .subscriptions
            .borrow_mut()
            .insert(store.name().to_string());
    }

    /// `Ok(true)` when the reserved factory may proceed, `Ok(false)` when a
    /// production build asks for the existing entry instead.
    fn guard_reserved(&self, factory: &str) -> Result<bool, RuntimeError> {
        let Some(context) = self.current_component() else {
            return Ok(true);
        };
        if self.inner.mode.is_production() {
            tracing::warn!(
                factory,
                component = %context.name,
                "reserved factory called inside a component; returning the existing entry"
            );
            Ok(false)
        } else {
            tracing::error!(factory, component = %context.name, "reserved factory called inside a component");
            Err(RuntimeError::ReservedInComponent {
                factory: factory.to_string(),
                component: context.name,
            })
        }
    }

    // ─── stores ──────────────────────────────────────────────────────────────

    pub fn store(&self, name: &str) -> Option<Rc<NamedStore>> {
        self.inner.stores.borrow().get(name).cloned()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.inner.stores.borrow().keys().cloned().collect()
    }

    fn state_handle(&self, store: Rc<NamedStore>) -> ReactiveState {
        ReactiveState {
            store,
            runtime: self.clone(),
        }
    }

    fn get_or_create(&self, name: &str, initial: Value, policy: NotifyPolicy) -> (Rc<NamedStore>, bool) {
        let defaults = initial_object(name, initial);
        if let Some(existing) = self.store(name) {
            existing.merge_defaults(defaults);
            return (existing, false);
        }
        let store = NamedStore::new(name, defaults, policy);
        self.inner
            .stores
            .borrow_mut()
            .insert(name.to_string(), store.clone());
        tracing::debug!(store = name, ?policy, "store created");
        (store, true)
    }

    /// `createState`: the store named `name`, created on first use. Later
    /// calls return the same store; their initial values only fill in keys it
    /// does not have yet.
    pub fn create_state(&self, name: &str, initial: Value) -> Result<Option<ReactiveState>, RuntimeError> {
        if !self.guard_reserved("createState")? {
            return Ok(self.get_state(name));
        }
        let (store, _) = self.get_or_create(name, initial, NotifyPolicy::OnChange);
        Ok(Some(self.state_handle(store)))
    }

    /// `createStore`, an alias of [`Runtime::create_state`].
    pub fn create_store(&self, name: &str, initial: Value) -> Result<Option<ReactiveState>, RuntimeError> {
        self.create_state(name, initial)
    }

    pub fn get_state(&self, name: &str) -> Option<ReactiveState> {
        self.store(name).map(|store| self.state_handle(store))
    }

    /// `useStore`: the merge-and-always-notify variant. The first caller's
    /// actions are bound; later callers get the existing table.
    pub fn use_store(
        &self,
        name: &str,
        initial: Value,
        actions: Vec<(&str, StoreAction)>,
    ) -> ReactiveState {
        let (store, created) = self.get_or_create(name, initial, NotifyPolicy::Always);
        if created {
            for (action, f) in actions {
                store.add_action(action, f);
            }
        }
        self.track(&store);
        self.state_handle(store)
    }

    /// `updateStore`: merge a partial object, or the result of an updater,
    /// into the store.
    pub fn update_store(&self, name: &str, update: StoreUpdate) -> Result<bool, RuntimeError> {
        let store = self
            .store(name)
            .ok_or_else(|| RuntimeError::UnknownStore(name.to_string()))?;
        Ok(match update {
            StoreUpdate::Merge(partial) => store.merge(partial),
            StoreUpdate::Updater(updater) => store.update_with(updater),
        })
    }

    pub fn read_store(&self, name: &str, property: &str) -> Result<Value, RuntimeError> {
        let store = self
            .store(name)
            .ok_or_else(|| RuntimeError::UnknownStore(name.to_string()))?;
        self.track(&store);
        Ok(store.get(property).unwrap_or(Value::Null))
    }

    pub fn store_snapshot(&self, name: &str) -> Result<Value, RuntimeError> {
        let store = self
            .store(name)
            .ok_or_else(|| RuntimeError::UnknownStore(name.to_string()))?;
        self.track(&store);
        Ok(store.snapshot())
    }

    pub fn write_store(&self, name: &str, property: &str, value: Value) -> Result<bool, RuntimeError> {
        let store = self
            .store(name)
            .ok_or_else(|| RuntimeError::UnknownStore(name.to_string()))?;
        Ok(store.set(property, value))
    }

    // ─── actions ─────────────────────────────────────────────────────────────

    /// `createActions`: register a named action group. Existing action names
    /// keep their first definition.
    pub fn create_actions(
        &self,
        name: &str,
        actions: Vec<(&str, GroupAction)>,
    ) -> Result<Option<ActionsHandle>, RuntimeError> {
        if !self.guard_reserved("createActions")? {
            return Ok(self.get_actions(name));
        }
        {
            let mut groups = self.inner.action_groups.borrow_mut();
            let group = groups.entry(name.to_string()).or_default();
            for (action, f) in actions {
                group.entry(action.to_string()).or_insert(f);
            }
        }
        tracing::debug!(group = name, "actions registered");
        Ok(Some(ActionsHandle {
            group: name.to_string(),
            runtime: self.clone(),
        }))
    }

    /// Action groups, or stores that carry bound actions.
    pub fn get_actions(&self, name: &str) -> Option<ActionsHandle> {
        self.has_actions(name).then(|| ActionsHandle {
            group: name.to_string(),
            runtime: self.clone(),
        })
    }

    pub fn has_actions(&self, name: &str) -> bool {
        self.inner.action_groups.borrow().contains_key(name)
            || self.store(name).is_some_and(|s| s.has_actions())
    }

    pub fn dispatch_action(&self, group: &str, action: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let (group_exists, found) = {
            let groups = self.inner.action_groups.borrow();
            let entry = groups.get(group);
            (entry.is_some(), entry.and_then(|g| g.get(action).cloned()))
        };
        if let Some(f) = found {
            tracing::debug!(group, action, "dispatching action");
            return Ok(f(self, args));
        }

        let unknown_action = || RuntimeError::UnknownAction {
            group: group.to_string(),
            action: action.to_string(),
        };
        match self.store(group) {
            Some(store) if store.has_actions() => {
                tracing::debug!(store = group, action, "dispatching store action");
                store.call_action(action, args).ok_or_else(unknown_action)
            }
            _ if group_exists => Err(unknown_action()),
            _ => Err(RuntimeError::UnknownActions(group.to_string())),
        }
    }

    // ─── hooks ───────────────────────────────────────────────────────────────

    /// `createHooks`: property hooks on an existing store. A missing store is
    /// logged and yields `None`.
    pub fn create_hooks(
        &self,
        state_name: &str,
        hooks: Vec<(&str, HookFn)>,
    ) -> Result<Option<HookSet>, RuntimeError> {
        if !self.guard_reserved("createHooks")? {
            return Ok(self.get_hooks(state_name));
        }
        let Some(store) = self.store(state_name) else {
            tracing::warn!(store = state_name, "createHooks: no such store; hooks not registered");
            return Ok(None);
        };

        let registered: Vec<(String, HookId)> = hooks
            .into_iter()
            .map(|(property, callback)| (property.to_string(), store.add_hook(property, None, callback)))
            .collect();

        let mut sets = self.inner.hook_sets.borrow_mut();
        let set = sets.entry(state_name.to_string()).or_insert_with(|| HookSet {
            store: state_name.to_string(),
            hooks: Vec::new(),
        });
        set.hooks.extend(registered);
        Ok(Some(set.clone()))
    }

    pub fn get_hooks(&self, state_name: &str) -> Option<HookSet> {
        self.inner.hook_sets.borrow().get(state_name).cloned()
    }

    /// Hook attributed to a component instance; removed when it unmounts.
    pub fn on_state_change(
        &self,
        owner: InstanceId,
        store: &str,
        property: &str,
        callback: HookFn,
    ) -> Option<HookId> {
        let Some(target) = self.store(store) else {
            tracing::warn!(store, property, "onStateChange: no such store");
            return None;
        };
        Some(target.add_hook(property, Some(owner), callback))
    }

    /// Drop every hook owned by `owner` and every subscription of
    /// `subscriber`. Returns (hooks removed, stores unsubscribed).
    pub fn release_instance(&self, owner: InstanceId, subscriber: &Weak<dyn Subscriber>) -> (usize, usize) {
        let stores: Vec<Rc<NamedStore>> = self.inner.stores.borrow().values().cloned().collect();
        let mut hooks = 0;
        let mut subscriptions = 0;
        for store in stores {
            hooks += store.remove_hooks_owned_by(owner);
            if store.unsubscribe(subscriber) {
                subscriptions += 1;
            }
        }
        (hooks, subscriptions)
    }

    // ─── element registry ────────────────────────────────────────────────────

    /// `customElements.define`. Matching elements already in the document
    /// are upgraded.
    pub fn define(&self, tag: &str, class: ElementClass) -> Result<(), RuntimeError> {
        if !is_valid_custom_element_name(tag) {
            return Err(RuntimeError::InvalidName(tag.to_string()));
        }
        {
            let mut registry = self.inner.registry.borrow_mut();
            if registry.contains_key(tag) {
                return Err(RuntimeError::AlreadyDefined(tag.to_string()));
            }
            registry.insert(tag.to_string(), class);
        }
        tracing::debug!(tag, "custom element defined");
        let root = self.inner.dom.borrow().root();
        self.upgrade(root);
        Ok(())
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.inner.registry.borrow().contains_key(tag)
    }

    pub fn defined_tags(&self) -> Vec<String> {
        self.inner.registry.borrow().keys().cloned().collect()
    }

    pub fn element_class(&self, tag: &str) -> Option<ElementClass> {
        self.inner.registry.borrow().get(tag).cloned()
    }

    /// Register a generated component. Function components need their entry
    /// point provided first.
    pub fn register_component(&self, definition: &ComponentDefinition) -> Result<(), RuntimeError> {
        match definition.dialect {
            Dialect::Markup => {
                let class = Rc::new(MarkupClass::compile(definition.clone()));
                let factory: ElementFactory = Rc::new(move |runtime: &Runtime, host: NodeId| {
                    let element: Rc<dyn CustomElement> = MarkupElement::new(runtime.clone(), host, class.clone());
                    element
                });
                self.define(
                    &definition.tag_name,
                    ElementClass::new(&definition.class_name, definition.observed_attributes.clone(), factory),
                )
            }
            Dialect::Function => {
                let entry = definition
                    .entry_point
                    .as_deref()
                    .unwrap_or(&definition.class_name);
                self.create_component(entry, &definition.tag_name, definition.observed_attributes.clone())
            }
        }
    }

    pub fn register_all(&self, definitions: &[ComponentDefinition]) -> Result<(), RuntimeError> {
        for definition in definitions {
            self.register_component(definition)?;
        }
        Ok(())
    }

    /// Link a native implementation to a function-component entry point.
    pub fn provide_function(
        &self,
        entry: &str,
        function: impl Fn(&RenderContext, &Map<String, Value>) -> String + 'static,
    ) {
        self.inner
            .functions
            .borrow_mut()
            .insert(entry.to_string(), Rc::new(function));
    }

    /// Handler reachable from any component by bare name, after instance
    /// methods and local handlers.
    pub fn provide_handler(&self, name: &str, handler: EventHandler) {
        self.inner
            .handlers
            .borrow_mut()
            .insert(name.to_string(), handler);
    }

    pub fn global_handler(&self, name: &str) -> Option<EventHandler> {
        self.inner.handlers.borrow().get(name).cloned()
    }

    /// `createComponent(Entry, tag, observed)`
    pub fn create_component(&self, entry: &str, tag: &str, observed: Vec<String>) -> Result<(), RuntimeError> {
        let function = self
            .inner
            .functions
            .borrow()
            .get(entry)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingEntryPoint(entry.to_string()))?;
        let entry_name = entry.to_string();
        let factory: ElementFactory = Rc::new(move |runtime: &Runtime, host: NodeId| {
            let element: Rc<dyn CustomElement> =
                FunctionElement::new(runtime.clone(), host, &entry_name, function.clone());
            element
        });
        self.define(tag, ElementClass::new(entry, observed, factory))
    }

    /// Register a widget builder as a custom element. Attributes become the
    /// widget's props.
    pub fn define_widget(&self, tag: &str, observed: Vec<String>, build: WidgetFactory) -> Result<(), RuntimeError> {
        let factory: ElementFactory = Rc::new(move |runtime: &Runtime, host: NodeId| {
            let element: Rc<dyn CustomElement> = WidgetElement::new(runtime.clone(), host, build.clone());
            element
        });
        self.define(tag, ElementClass::new(tag, observed, factory))
    }

    // ─── lifecycle ───────────────────────────────────────────────────────────

    pub fn instance(&self, node: NodeId) -> Option<Rc<dyn CustomElement>> {
        self.inner.instances.borrow().get(&node).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.borrow().len()
    }

    pub fn create_element(&self, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let mut doc = self.inner.dom.borrow_mut();
        let node = doc.create_element(tag);
        for (name, value) in attributes {
            doc.set_attribute(node, name, value);
        }
        node
    }

    /// Append `child` and connect any custom elements it brings along.
    pub fn append(&self, parent: NodeId, child: NodeId) {
        self.inner.dom.borrow_mut().append_child(parent, child);
        self.upgrade(child);
    }

    /// Create `<tag ...attributes>` under `parent` and connect it.
    pub fn mount(&self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let node = self.create_element(tag, attributes);
        self.append(parent, node);
        node
    }

    /// Disconnect everything under `node` (shadow trees included), then
    /// detach it. The subtree stays allocated so it can be re-appended; free it
    /// with [`Document::release`](crate::document::Document::release).
    pub fn unmount(&self, node: NodeId) {
        let mut nodes = vec![node];
        nodes.extend(self.inner.dom.borrow().composed_descendants(node));
        self.disconnect_nodes(nodes);
        self.inner.dom.borrow_mut().detach(node);
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        let old = self.inner.dom.borrow_mut().set_attribute(node, name, value);
        self.attribute_changed(node, name, old, Some(value));
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        let old = self.inner.dom.borrow_mut().remove_attribute(node, name);
        if old.is_some() {
            self.attribute_changed(node, name, old, None);
        }
    }

    fn attribute_changed(&self, node: NodeId, name: &str, old: Option<String>, new: Option<&str>) {
        let Some(instance) = self.instance(node) else {
            return;
        };
        let observed = {
            let doc = self.inner.dom.borrow();
            doc.tag_name(node)
                .and_then(|tag| self.element_class(tag))
                .is_some_and(|class| class.observed_attributes.iter().any(|a| a == name))
        };
        if observed {
            instance.attribute_changed(name, old.as_deref(), new);
        }
    }

    /// Swap the content under `root` for parsed `html`: instances in the old
    /// content are disconnected, custom elements in the new content connected.
    pub fn replace_content(&self, root: NodeId, html: &str) -> Vec<NodeId> {
        let old = self.inner.dom.borrow().composed_descendants(root);
        self.disconnect_nodes(old);
        let created = self.inner.dom.borrow_mut().set_inner_html(root, html);
        let fresh = self.inner.dom.borrow().composed_descendants(root);
        self.connect_nodes(fresh);
        created
    }

    /// Connect `node` and its composed descendants that belong to a defined
    /// tag and have no instance yet.
    fn upgrade(&self, node: NodeId) {
        let mut nodes = vec![node];
        nodes.extend(self.inner.dom.borrow().composed_descendants(node));
        self.connect_nodes(nodes);
    }

    fn connect_nodes(&self, nodes: Vec<NodeId>) {
        for node in nodes {
            if self.inner.instances.borrow().contains_key(&node) {
                continue;
            }
            let tag = {
                let doc = self.inner.dom.borrow();
                if !doc.is_connected(node) {
                    continue;
                }
                match doc.tag_name(node) {
                    Some(tag) => tag.to_string(),
                    None => continue,
                }
            };
            let Some(class) = self.element_class(&tag) else {
                continue;
            };
            let instance = (class.factory)(self, node);
            self.inner
                .instances
                .borrow_mut()
                .insert(node, instance.clone());
            tracing::debug!(tag = %tag, class = %class.class_name, node = node.0, "custom element connected");
            instance.connected();
        }
    }

    fn disconnect_nodes(&self, nodes: Vec<NodeId>) {
        for node in nodes {
            let removed = self.inner.instances.borrow_mut().remove(&node);
            if let Some(instance) = removed {
                tracing::debug!(node = node.0, "custom element disconnected");
                instance.disconnected();
            }
        }
    }

    /// Disconnect every live instance. Stores survive until the last handle
    /// is dropped.
    pub fn teardown(&self) {
        let nodes: Vec<NodeId> = {
            let instances = self.inner.instances.borrow();
            let mut nodes: Vec<NodeId> = instances.keys().copied().collect();
            nodes.sort();
            nodes
        };
        self.disconnect_nodes(nodes);
        self.inner.current.borrow_mut().clear();
        tracing::debug!("runtime torn down");
    }
}

fn initial_object(name: &str, initial: Value) -> Map<String, Value> {
    match initial {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!(store = name, value = %other, "initial store state must be an object; starting empty");
            Map::new()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Reactive view of a named store. Reads subscribe the current component;
/// writes go through the store's hook and notification path.
#[derive(Clone)]
pub struct ReactiveState {
    store: Rc<NamedStore>,
    runtime: Runtime,
}

impl std::fmt::Debug for ReactiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.store, f)
    }
}

impl ReactiveState {
    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn store(&self) -> &Rc<NamedStore> {
        &self.store
    }

    pub fn same_store(&self, other: &ReactiveState) -> bool {
        Rc::ptr_eq(&self.store, &other.store)
    }

    pub fn get(&self, property: &str) -> Option<Value> {
        self.runtime.track(&self.store);
        self.store.get(property)
    }

    pub fn snapshot(&self) -> Value {
        self.runtime.track(&self.store);
        self.store.snapshot()
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) -> bool {
        self.store.set(property, value.into())
    }

    pub fn merge(&self, partial: Map<String, Value>) -> bool {
        self.store.merge(partial)
    }

    pub fn update_with(&self, updater: impl FnOnce(&Value) -> Value) -> bool {
        self.store.update_with(updater)
    }

    pub fn action_names(&self) -> Vec<String> {
        self.store.action_names()
    }

    pub fn call_action(&self, action: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.store
            .call_action(action, args)
            .ok_or_else(|| RuntimeError::UnknownAction {
                group: self.store.name().to_string(),
                action: action.to_string(),
            })
    }
}

/// Result of `getActions`.
#[derive(Clone)]
pub struct ActionsHandle {
    group: String,
    runtime: Runtime,
}

impl std::fmt::Debug for ActionsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionsHandle")
            .field("group", &self.group)
            .field("actions", &self.names())
            .finish()
    }
}

impl ActionsHandle {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn names(&self) -> Vec<String> {
        let groups = self.runtime.inner.action_groups.borrow();
        match groups.get(&self.group) {
            Some(group) => group.keys().cloned().collect(),
            None => self
                .runtime
                .store(&self.group)
                .map(|s| s.action_names())
                .unwrap_or_default(),
        }
    }

    pub fn call(&self, action: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        self.runtime.dispatch_action(&self.group, action, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe {
        hits: Cell<usize>,
    }

    impl Subscriber for Probe {
        fn notify(&self, _store: &str) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn context(runtime: &Runtime, probe: &Rc<Probe>) -> ComponentContext {
        let weak: Weak<dyn Subscriber> = Rc::downgrade(probe) as Weak<dyn Subscriber>;
        ComponentContext {
            id: runtime.next_instance_id(),
            name: "ProbeComponent".to_string(),
            subscriber: weak,
            subscriptions: Rc::new(RefCell::new(BTreeSet::new())),
        }
    }

    #[test]
    fn test_custom_element_names() {
        assert!(is_valid_custom_element_name("counter-button"));
        assert!(is_valid_custom_element_name("x-a.b_c1"));
        assert!(!is_valid_custom_element_name("counter"));
        assert!(!is_valid_custom_element_name("Counter-button"));
        assert!(!is_valid_custom_element_name("counter-Button"));
        assert!(!is_valid_custom_element_name("1-counter"));
        assert!(!is_valid_custom_element_name("font-face"));
    }

    #[test]
    fn test_create_state_returns_same_store_and_keeps_values() {
        let rt = Runtime::new(Mode::Development);
        let a = rt.create_state("x", json!({ "count": 0 })).unwrap().unwrap();
        a.set("count", 4);
        let b = rt.create_state("x", json!({ "count": 0, "label": "hi" })).unwrap().unwrap();
        assert!(a.same_store(&b));
        assert_eq!(b.get("count"), Some(json!(4)));
        assert_eq!(b.get("label"), Some(json!("hi")));
        assert!(rt.get_state("x").unwrap().same_store(&a));
        assert!(rt.get_state("y").is_none());
    }

    #[test]
    fn test_reads_inside_component_subscribe_once() {
        let rt = Runtime::new(Mode::Development);
        let state = rt.create_state("counter", json!({ "count": 0 })).unwrap().unwrap();
        let probe = Rc::new(Probe { hits: Cell::new(0) });
        let ctx = context(&rt, &probe);
        let subscriptions = ctx.subscriptions.clone();

        rt.with_component(ctx, || {
            state.get("count");
            rt.read_store("counter", "count").unwrap();
        });
        assert_eq!(state.store().subscriber_count(), 1);
        assert!(subscriptions.borrow().contains("counter"));
        assert!(rt.current_component().is_none());

        state.set("count", 1);
        state.set("count", 1);
        assert_eq!(probe.hits.get(), 1);
    }

    #[test]
    fn test_reserved_factories_inside_component() {
        let dev = Runtime::new(Mode::Development);
        let probe = Rc::new(Probe { hits: Cell::new(0) });
        let err = dev
            .with_component(context(&dev, &probe), || dev.create_state("x", json!({})))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ReservedInComponent { ref factory, .. } if factory == "createState"));
        assert!(dev.store("x").is_none());

        let prod = Runtime::new(Mode::Production);
        prod.create_state("x", json!({ "v": 1 })).unwrap();
        let existing = prod
            .with_component(context(&prod, &probe), || prod.create_state("x", json!({ "w": 2 })))
            .unwrap()
            .unwrap();
        assert_eq!(existing.snapshot(), json!({ "v": 1 }));
        let missing = prod
            .with_component(context(&prod, &probe), || prod.create_hooks("nope", vec![]))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_actions_groups_and_store_actions() {
        let rt = Runtime::new(Mode::Development);
        rt.create_state("counter", json!({ "count": 0 })).unwrap();
        let set_count: GroupAction = Rc::new(|rt: &Runtime, args: &[Value]| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            let _ = rt.write_store("counter", "count", value);
            Value::Null
        });
        let handle = rt
            .create_actions("counterActions", vec![("set", set_count)])
            .unwrap()
            .unwrap();
        handle.call("set", &[json!(5)]).unwrap();
        assert_eq!(rt.read_store("counter", "count").unwrap(), json!(5));
        assert_eq!(handle.names(), vec!["set"]);

        let inc: StoreAction = Rc::new(|store: &NamedStore, _args: &[Value]| {
            let n = store.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            store.set("n", json!(n + 1));
            Value::Null
        });
        let cart = rt.use_store("cart", json!({ "n": 0 }), vec![("inc", inc)]);
        rt.get_actions("cart").unwrap().call("inc", &[]).unwrap();
        assert_eq!(cart.get("n"), Some(json!(1)));

        assert_eq!(
            rt.dispatch_action("counterActions", "nope", &[]),
            Err(RuntimeError::UnknownAction {
                group: "counterActions".into(),
                action: "nope".into()
            })
        );
        assert_eq!(
            rt.dispatch_action("ghost", "x", &[]),
            Err(RuntimeError::UnknownActions("ghost".into()))
        );
    }

    #[test]
    fn test_hooks_registry_and_release() {
        let rt = Runtime::new(Mode::Development);
        let state = rt.create_state("theme", json!({ "mode": "light" })).unwrap().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let hook: HookFn = Rc::new(move |new: &Value, old: &Value, prop: &str| {
            s.borrow_mut().push(format!("{}:{}->{}", prop, old, new));
        });
        let set = rt.create_hooks("theme", vec![("mode", hook)]).unwrap().unwrap();
        assert_eq!(set.properties(), vec!["mode"]);
        assert_eq!(rt.get_hooks("theme"), Some(set));
        assert!(rt.create_hooks("missing", vec![]).unwrap().is_none());

        let owned = rt
            .on_state_change(7, "theme", "mode", Rc::new(|_: &Value, _: &Value, _: &str| {}))
            .unwrap();
        assert!(owned > 0);
        assert_eq!(state.store().hook_count(), 2);

        state.set("mode", "dark");
        assert_eq!(*seen.borrow(), vec!["mode:\"light\"->\"dark\"".to_string()]);

        let probe = Rc::new(Probe { hits: Cell::new(0) });
        let weak: Weak<dyn Subscriber> = Rc::downgrade(&probe) as Weak<dyn Subscriber>;
        state.store().subscribe(weak.clone());
        assert_eq!(rt.release_instance(7, &weak), (1, 1));
        assert_eq!(state.store().hook_count(), 1);
        assert_eq!(state.store().subscriber_count(), 0);
    }

    #[test]
    fn test_update_store_merges() {
        let rt = Runtime::new(Mode::Development);
        let state = rt.use_store("prefs", json!({ "a": 1 }), vec![]);
        let probe = Rc::new(Probe { hits: Cell::new(0) });
        state.store().subscribe(Rc::downgrade(&probe) as Weak<dyn Subscriber>);

        rt.update_store("prefs", StoreUpdate::Merge(json!({ "b": 2 }).as_object().cloned().unwrap()))
            .unwrap();
        rt.update_store(
            "prefs",
            StoreUpdate::Updater(Box::new(|s: &Value| json!({ "a": s["a"].as_i64().unwrap_or(0) + 1 }))),
        )
        .unwrap();
        assert_eq!(state.snapshot(), json!({ "a": 2, "b": 2 }));
        assert_eq!(probe.hits.get(), 2);
        assert_eq!(
            rt.update_store("ghost", StoreUpdate::Merge(Map::new())),
            Err(RuntimeError::UnknownStore("ghost".into()))
        );
    }

    #[test]
    fn test_define_rejects_bad_and_duplicate_names() {
        let rt = Runtime::new(Mode::Development);
        rt.provide_function("Badge", |_ctx: &RenderContext, _props: &Map<String, Value>| "<b>x</b>".to_string());
        assert_eq!(
            rt.create_component("Badge", "badge", vec![]),
            Err(RuntimeError::InvalidName("badge".into()))
        );
        rt.create_component("Badge", "x-badge", vec![]).unwrap();
        assert_eq!(
            rt.create_component("Badge", "x-badge", vec![]),
            Err(RuntimeError::AlreadyDefined("x-badge".into()))
        );
        assert_eq!(
            rt.create_component("Missing", "x-missing", vec![]),
            Err(RuntimeError::MissingEntryPoint("Missing".into()))
        );
        assert_eq!(rt.defined_tags(), vec!["x-badge"]);
    }
}
