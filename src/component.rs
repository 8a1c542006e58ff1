//! Component instances
//!
//! The host side of a generated component. The runtime drives every instance
//! through [`CustomElement`]: connect, disconnect, observed attribute changes
//! and store-triggered re-renders. [`MarkupElement`] backs markup-dialect
//! classes, running their initializers, methods and `{{ }}` placeholders in
//! the expression sandbox. [`FunctionElement`] backs `createComponent`
//! wrappers around native render functions with call-order state slots.

use serde_json::{Map, Value};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use crate::codegen::ComponentDefinition;
use crate::document::{Event, NodeId};
use crate::eval::{execute, interpolate, strict_equals, CompiledScript, EvalError, EvalResult, EvalScope};
use crate::events::{bind_events, EventHandler, HandlerKind, HandlerRef, ResolverChain};
use crate::parse::kebab_to_camel;
use crate::runtime::{ComponentContext, ReactiveState, Runtime, RuntimeError};
use crate::store::{HookFn, HookId, InstanceId, StoreAction, Subscriber};

/// Lifecycle contract between the runtime and one connected host element.
pub trait CustomElement {
    fn host(&self) -> NodeId;

    fn connected(&self);

    fn disconnected(&self);

    /// Called for observed attributes only.
    fn attribute_changed(&self, name: &str, old: Option<&str>, new: Option<&str>);

    /// Re-render entry point; a no-op while disconnected.
    fn render(&self);

    /// Render passes run so far.
    fn render_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

/// Native render function behind a function-dialect component.
pub type FunctionComponent = Rc<dyn Fn(&RenderContext, &Map<String, Value>) -> String>;

/// Serializes renders of one instance: a render requested while one is in
/// progress runs right after it instead of nesting.
#[derive(Debug, Default)]
struct RenderCycle {
    rendering: Cell<bool>,
    pending: Cell<bool>,
    passes: Cell<usize>,
}

impl RenderCycle {
    fn run(&self, mut render: impl FnMut()) {
        if self.rendering.get() {
            self.pending.set(true);
            return;
        }
        self.rendering.set(true);
        loop {
            self.pending.set(false);
            self.passes.set(self.passes.get() + 1);
            render();
            if !self.pending.get() {
                break;
            }
        }
        self.rendering.set(false);
    }

    fn passes(&self) -> usize {
        self.passes.get()
    }
}

fn eval_error(error: RuntimeError) -> EvalError {
    match error {
        RuntimeError::UnknownStore(store) => EvalError::UnknownStore(store),
        RuntimeError::UnknownAction { group, action } => EvalError::UnknownAction { group, action },
        other => EvalError::Runtime(other.to_string()),
    }
}

fn host_props(runtime: &Runtime, host: NodeId) -> Map<String, Value> {
    runtime
        .dom()
        .borrow()
        .attributes(host)
        .into_iter()
        .map(|(name, value)| (kebab_to_camel(&name), Value::String(value)))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP DIALECT
// ═══════════════════════════════════════════════════════════════════════════════

/// A generated definition plus its sandbox-compiled script, shared by every
/// instance of the class.
#[derive(Debug)]
pub struct MarkupClass {
    pub definition: ComponentDefinition,
    pub script: CompiledScript,
}

impl MarkupClass {
    pub fn compile(definition: ComponentDefinition) -> Self {
        let script = CompiledScript::compile(
            &definition.class_name,
            &definition.init_statements,
            &definition.methods,
        );
        Self { definition, script }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.script.methods.contains_key(name)
    }

    /// Declared props re-render like reactive variables.
    pub fn is_reactive(&self, field: &str) -> bool {
        self.definition.reactive_vars.iter().any(|v| v == field)
            || self.definition.observed_attributes.iter().any(|p| p == field)
    }
}

pub struct MarkupElement {
    runtime: Runtime,
    host: NodeId,
    content_root: NodeId,
    class: Rc<MarkupClass>,
    id: InstanceId,
    fields: RefCell<Map<String, Value>>,
    connected: Cell<bool>,
    rendered: Cell<bool>,
    last_html: RefCell<Option<String>>,
    subscriptions: Rc<RefCell<BTreeSet<String>>>,
    cycle: RenderCycle,
    self_ref: Weak<MarkupElement>,
}

impl std::fmt::Debug for MarkupElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkupElement")
            .field("class", &self.class.definition.class_name)
            .field("host", &self.host)
            .field("fields", &self.fields.borrow())
            .field("connected", &self.connected.get())
            .finish()
    }
}

impl MarkupElement {
    pub fn new(runtime: Runtime, host: NodeId, class: Rc<MarkupClass>) -> Rc<Self> {
        let content_root = runtime
            .dom()
            .borrow_mut()
            .attach_shadow(host)
            .unwrap_or(host);
        let id = runtime.next_instance_id();
        Rc::new_cyclic(|me| Self {
            runtime,
            host,
            content_root,
            class,
            id,
            fields: RefCell::new(Map::new()),
            connected: Cell::new(false),
            rendered: Cell::new(false),
            last_html: RefCell::new(None),
            subscriptions: Rc::new(RefCell::new(BTreeSet::new())),
            cycle: RenderCycle::default(),
            self_ref: me.clone(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class.definition.class_name
    }

    pub fn content_root(&self) -> NodeId {
        self.content_root
    }

    pub fn value(&self, field: &str) -> Option<Value> {
        self.fields.borrow().get(field).cloned()
    }

    pub fn fields(&self) -> Map<String, Value> {
        self.fields.borrow().clone()
    }

    /// Stores this instance is subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.borrow().iter().cloned().collect()
    }

    /// Write a field. Reactive fields re-render when the value changed, once
    /// the first render has happened.
    pub fn assign(&self, field: &str, value: Value) {
        let changed = {
            let mut fields = self.fields.borrow_mut();
            match fields.get(field) {
                Some(old) if strict_equals(old, &value) => false,
                _ => {
                    fields.insert(field.to_string(), value);
                    true
                }
            }
        };
        if changed && self.rendered.get() && self.class.is_reactive(field) {
            tracing::debug!(component = %self.class_name(), field, "reactive field changed");
            self.render();
        }
    }

    /// Call a script method with this instance as the current component.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> EvalResult<Value> {
        let compiled = self
            .class
            .script
            .methods
            .get(method)
            .ok_or_else(|| EvalError::UnknownMethod(method.to_string()))?;
        self.runtime
            .with_component(self.context(), || compiled.call(args, self))
    }

    /// Store hook owned by this instance; removed on disconnect.
    pub fn on_state_change(&self, store: &str, property: &str, callback: HookFn) -> Option<HookId> {
        self.runtime.on_state_change(self.id, store, property, callback)
    }

    fn context(&self) -> ComponentContext {
        let subscriber: Weak<dyn Subscriber> = self.self_ref.clone();
        ComponentContext {
            id: self.id,
            name: self.class.definition.class_name.clone(),
            subscriber,
            subscriptions: self.subscriptions.clone(),
        }
    }

    fn call_hook_method(&self, method: &str) {
        if !self.class.has_method(method) {
            return;
        }
        if let Err(e) = self.invoke(method, Vec::new()) {
            tracing::error!(component = %self.class_name(), method, error = %e, "lifecycle method failed");
        }
    }

    /// Instance methods first, then handlers provided to the runtime.
    fn resolver_chain(&self) -> ResolverChain {
        let me = self.self_ref.clone();
        let class = self.class.clone();
        let runtime = self.runtime.clone();
        ResolverChain::new()
            .with("instance", move |h: &HandlerRef| {
                if !class.has_method(&h.name) {
                    return None;
                }
                let me = me.clone();
                let method = h.name.clone();
                let handler: EventHandler = Rc::new(move |_event: &mut Event, args: Vec<Value>| {
                    let Some(element) = me.upgrade() else {
                        return;
                    };
                    if let Err(e) = element.invoke(&method, args) {
                        tracing::error!(
                            component = %element.class_name(),
                            method = %method,
                            error = %e,
                            "event handler failed"
                        );
                    }
                });
                Some(handler)
            })
            .with("global", move |h: &HandlerRef| match h.kind {
                HandlerKind::Named => runtime.global_handler(&h.name),
                HandlerKind::Method => None,
            })
    }

    fn render_now(&self) {
        let definition = &self.class.definition;
        let html = self
            .runtime
            .with_component(self.context(), || interpolate(&definition.template, self));
        let content = if definition.style.trim().is_empty() {
            html
        } else {
            format!("<style>{}</style>{}", definition.style, html)
        };
        self.rendered.set(true);

        if self.last_html.borrow().as_deref() == Some(content.as_str()) {
            tracing::debug!(component = %definition.class_name, "render produced identical markup; skipped");
            return;
        }

        self.runtime.replace_content(self.content_root, &content);
        *self.last_html.borrow_mut() = Some(content);

        let scope: Weak<dyn EvalScope> = self.self_ref.clone();
        let report = bind_events(
            self.runtime.dom(),
            self.content_root,
            &self.resolver_chain(),
            Some(scope),
        );
        tracing::debug!(
            component = %definition.class_name,
            bound = report.bound,
            unresolved = report.unresolved.len(),
            "rendered"
        );
    }
}

impl CustomElement for MarkupElement {
    fn host(&self) -> NodeId {
        self.host
    }

    fn connected(&self) {
        self.connected.set(true);

        let init = &self.class.script.init;
        if let Err(e) = self
            .runtime
            .with_component(self.context(), || execute(init, self))
        {
            tracing::error!(component = %self.class_name(), error = %e, "initializer failed");
        }

        let attributes = self.runtime.dom().borrow().attributes(self.host);
        for (name, value) in attributes {
            if self.class.has_method(&name) {
                continue;
            }
            self.assign(&name, Value::String(value));
        }

        self.render();
        self.call_hook_method("onMounted");
    }

    fn disconnected(&self) {
        self.connected.set(false);
        let subscriber: Weak<dyn Subscriber> = self.self_ref.clone();
        let (hooks, stores) = self.runtime.release_instance(self.id, &subscriber);
        self.subscriptions.borrow_mut().clear();
        tracing::debug!(component = %self.class_name(), hooks, stores, "instance released");

        // Outside a component context so reads here cannot re-subscribe.
        if let Some(method) = self.class.script.methods.get("onUnmounted") {
            if let Err(e) = method.call(Vec::new(), self) {
                tracing::error!(component = %self.class_name(), error = %e, "onUnmounted failed");
            }
        }
    }

    fn attribute_changed(&self, name: &str, old: Option<&str>, new: Option<&str>) {
        if old == new {
            return;
        }
        let value = new.map_or(Value::Null, |v| Value::String(v.to_string()));
        self.assign(name, value);
    }

    fn render(&self) {
        if !self.connected.get() {
            return;
        }
        self.cycle.run(|| self.render_now());
    }

    fn render_count(&self) -> usize {
        self.cycle.passes()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Subscriber for MarkupElement {
    fn notify(&self, store: &str) {
        tracing::debug!(component = %self.class_name(), store, "store changed; re-rendering");
        self.render();
    }
}

impl EvalScope for MarkupElement {
    fn field(&self, name: &str) -> Option<Value> {
        self.value(name)
    }

    fn set_field(&self, name: &str, value: Value) -> EvalResult<()> {
        self.assign(name, value);
        Ok(())
    }

    /// Only methods compiled from the component script resolve here. The
    /// sandbox has no function values, so `this.onStateChange(...)` is not
    /// available to in-memory scripts; hosts register instance hooks through
    /// [`MarkupElement::on_state_change`].
    fn call_method(&self, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.invoke(name, args)
    }

    fn identifier(&self, name: &str) -> Option<Value> {
        self.value(name)
    }

    fn has_store(&self, name: &str) -> bool {
        self.runtime.store(name).is_some()
    }

    fn read_store(&self, store: &str, prop: &str) -> EvalResult<Value> {
        self.runtime.read_store(store, prop).map_err(eval_error)
    }

    fn store_snapshot(&self, store: &str) -> EvalResult<Value> {
        self.runtime.store_snapshot(store).map_err(eval_error)
    }

    fn write_store(&self, store: &str, prop: &str, value: Value) -> EvalResult<()> {
        self.runtime
            .write_store(store, prop, value)
            .map(|_| ())
            .map_err(eval_error)
    }

    fn has_actions(&self, group: &str) -> bool {
        self.runtime.has_actions(group)
    }

    fn call_action(&self, group: &str, action: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.runtime
            .dispatch_action(group, action, &args)
            .map_err(eval_error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FUNCTION DIALECT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct FunctionElement {
    runtime: Runtime,
    host: NodeId,
    content_root: NodeId,
    id: InstanceId,
    entry: String,
    function: FunctionComponent,
    slots: RefCell<Vec<Option<Value>>>,
    handlers: RefCell<BTreeMap<String, EventHandler>>,
    connected: Cell<bool>,
    subscriptions: Rc<RefCell<BTreeSet<String>>>,
    cycle: RenderCycle,
    self_ref: Weak<FunctionElement>,
}

impl std::fmt::Debug for FunctionElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionElement")
            .field("entry", &self.entry)
            .field("host", &self.host)
            .field("slots", &self.slots.borrow())
            .field("connected", &self.connected.get())
            .finish()
    }
}

impl FunctionElement {
    pub fn new(runtime: Runtime, host: NodeId, entry: &str, function: FunctionComponent) -> Rc<Self> {
        let content_root = runtime
            .dom()
            .borrow_mut()
            .attach_shadow(host)
            .unwrap_or(host);
        let id = runtime.next_instance_id();
        Rc::new_cyclic(|me| Self {
            runtime,
            host,
            content_root,
            id,
            entry: entry.to_string(),
            function,
            slots: RefCell::new(Vec::new()),
            handlers: RefCell::new(BTreeMap::new()),
            connected: Cell::new(false),
            subscriptions: Rc::new(RefCell::new(BTreeSet::new())),
            cycle: RenderCycle::default(),
            self_ref: me.clone(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn content_root(&self) -> NodeId {
        self.content_root
    }

    /// Host attributes with kebab-case names in camelCase.
    pub fn props(&self) -> Map<String, Value> {
        host_props(&self.runtime, self.host)
    }

    pub fn slot(&self, index: usize) -> Option<Value> {
        self.slots.borrow().get(index).cloned().flatten()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.borrow().keys().cloned().collect()
    }

    fn context(&self) -> ComponentContext {
        let subscriber: Weak<dyn Subscriber> = self.self_ref.clone();
        ComponentContext {
            id: self.id,
            name: self.entry.clone(),
            subscriber,
            subscriptions: self.subscriptions.clone(),
        }
    }

    /// Local handlers registered during the last render, then handlers
    /// provided to the runtime.
    fn resolver_chain(&self) -> ResolverChain {
        let local = self.handlers.borrow().clone();
        let runtime = self.runtime.clone();
        ResolverChain::new()
            .with("local", move |h: &HandlerRef| local.get(&h.name).cloned())
            .with("global", move |h: &HandlerRef| runtime.global_handler(&h.name))
    }

    fn render_now(&self) {
        let Some(element) = self.self_ref.upgrade() else {
            return;
        };
        self.handlers.borrow_mut().clear();
        let props = self.props();
        let context = RenderContext {
            element,
            slot: Cell::new(0),
        };

        let html = self.runtime.with_component(self.context(), || {
            let markup = (self.function)(&context, &props);
            interpolate(&markup, self)
        });

        self.runtime.replace_content(self.content_root, &html);
        let scope: Weak<dyn EvalScope> = self.self_ref.clone();
        let report = bind_events(
            self.runtime.dom(),
            self.content_root,
            &self.resolver_chain(),
            Some(scope),
        );
        tracing::debug!(
            component = %self.entry,
            slots = context.slot.get(),
            bound = report.bound,
            unresolved = report.unresolved.len(),
            "rendered"
        );
    }
}

impl CustomElement for FunctionElement {
    fn host(&self) -> NodeId {
        self.host
    }

    fn connected(&self) {
        self.connected.set(true);
        self.render();
    }

    fn disconnected(&self) {
        self.connected.set(false);
        let subscriber: Weak<dyn Subscriber> = self.self_ref.clone();
        let (hooks, stores) = self.runtime.release_instance(self.id, &subscriber);
        self.subscriptions.borrow_mut().clear();
        tracing::debug!(component = %self.entry, hooks, stores, "instance released");
    }

    fn attribute_changed(&self, _name: &str, _old: Option<&str>, _new: Option<&str>) {
        self.render();
    }

    fn render(&self) {
        if !self.connected.get() {
            return;
        }
        self.cycle.run(|| self.render_now());
    }

    fn render_count(&self) -> usize {
        self.cycle.passes()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Subscriber for FunctionElement {
    fn notify(&self, store: &str) {
        tracing::debug!(component = %self.entry, store, "store changed; re-rendering");
        self.render();
    }
}

/// `props.x` in placeholders and handler arguments.
impl EvalScope for FunctionElement {
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn identifier(&self, name: &str) -> Option<Value> {
        (name == "props").then(|| Value::Object(self.props()))
    }

    fn has_store(&self, name: &str) -> bool {
        self.runtime.store(name).is_some()
    }

    fn read_store(&self, store: &str, prop: &str) -> EvalResult<Value> {
        self.runtime.read_store(store, prop).map_err(eval_error)
    }

    fn store_snapshot(&self, store: &str) -> EvalResult<Value> {
        self.runtime.store_snapshot(store).map_err(eval_error)
    }

    fn write_store(&self, store: &str, prop: &str, value: Value) -> EvalResult<()> {
        self.runtime
            .write_store(store, prop, value)
            .map(|_| ())
            .map_err(eval_error)
    }

    fn has_actions(&self, group: &str) -> bool {
        self.runtime.has_actions(group)
    }

    fn call_action(&self, group: &str, action: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.runtime
            .dispatch_action(group, action, &args)
            .map_err(eval_error)
    }
}

/// What a native render function sees during one render pass.
pub struct RenderContext {
    element: Rc<FunctionElement>,
    slot: Cell<usize>,
}

impl RenderContext {
    pub fn runtime(&self) -> &Runtime {
        &self.element.runtime
    }

    pub fn host(&self) -> NodeId {
        self.element.host
    }

    /// `useState`: the Nth call in a render owns slot N. The initial value is
    /// used only while the slot is empty.
    pub fn use_state(&self, initial: impl Into<Value>) -> (Value, StateSetter) {
        let index = self.slot.get();
        self.slot.set(index + 1);
        let value = {
            let mut slots = self.element.slots.borrow_mut();
            if slots.len() <= index {
                slots.resize(index + 1, None);
            }
            slots[index].get_or_insert_with(|| initial.into()).clone()
        };
        let setter = StateSetter {
            element: Rc::downgrade(&self.element),
            index,
        };
        (value, setter)
    }

    /// `useHandlers`: make handlers resolvable by bare name for this render.
    pub fn use_handlers(&self, handlers: Vec<(&str, EventHandler)>) {
        let mut map = self.element.handlers.borrow_mut();
        for (name, handler) in handlers {
            map.insert(name.to_string(), handler);
        }
    }

    pub fn use_handler(&self, name: &str, handler: impl Fn(&mut Event, Vec<Value>) + 'static) {
        self.use_handlers(vec![(name, Rc::new(handler) as EventHandler)]);
    }

    /// `useStore`, subscribing this instance.
    pub fn use_store(&self, name: &str, initial: Value, actions: Vec<(&str, StoreAction)>) -> ReactiveState {
        self.element.runtime.use_store(name, initial, actions)
    }

    pub fn on_state_change(&self, store: &str, property: &str, callback: HookFn) -> Option<HookId> {
        self.element
            .runtime
            .on_state_change(self.element.id, store, property, callback)
    }
}

/// Writes one state slot and re-renders the owner, whether or not the value
/// changed.
#[derive(Clone)]
pub struct StateSetter {
    element: Weak<FunctionElement>,
    index: usize,
}

impl std::fmt::Debug for StateSetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSetter").field("index", &self.index).finish()
    }
}

impl StateSetter {
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        self.update(move |_| value);
    }

    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let Some(element) = self.element.upgrade() else {
            return;
        };
        let previous = element.slot(self.index).unwrap_or(Value::Null);
        let next = f(&previous);
        {
            let mut slots = element.slots.borrow_mut();
            if slots.len() <= self.index {
                slots.resize(self.index + 1, None);
            }
            slots[self.index] = Some(next);
        }
        element.render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate_component;
    use crate::config::Mode;
    use crate::parse::parse_component;
    use serde_json::json;

    fn define(runtime: &Runtime, source: &str, path: &str) {
        let record = parse_component(source, path).unwrap();
        runtime.register_component(&generate_component(&record)).unwrap();
    }

    fn markup(runtime: &Runtime, node: NodeId) -> Rc<dyn CustomElement> {
        runtime.instance(node).unwrap()
    }

    fn shadow_html(runtime: &Runtime, host: NodeId) -> String {
        let doc = runtime.dom().borrow();
        doc.shadow_root(host).map(|s| doc.inner_html(s)).unwrap_or_default()
    }

    const GREETING: &str = r#"<template><p>Hello {{ this.name }}! {{ this.count * 2 }}</p></template>
<script>
export let name = 'world'
this.count = 1
function bump() { this.count = this.count + 1 }
</script>
<style>p { color: red; }</style>"#;

    #[test]
    fn test_connect_runs_init_props_and_render() {
        let rt = Runtime::new(Mode::Development);
        define(&rt, GREETING, "src/hello-card.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "hello-card", &[("name", "Ada")]);

        let html = shadow_html(&rt, host);
        assert_eq!(html, "<style>p { color: red; }</style><p>Hello Ada! 2</p>");
        assert_eq!(markup(&rt, host).render_count(), 1);
    }

    #[test]
    fn test_reactive_write_rerenders_and_identical_markup_is_skipped() {
        let rt = Runtime::new(Mode::Development);
        define(&rt, GREETING, "src/hello-card.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "hello-card", &[]);
        let instance = markup(&rt, host);
        let element = instance.as_any().downcast_ref::<MarkupElement>().unwrap();

        element.invoke("bump", vec![]).unwrap();
        assert!(shadow_html(&rt, host).ends_with("<p>Hello world! 4</p>"));
        assert_eq!(element.value("count"), Some(json!(2)));

        // same value: no render
        element.assign("count", json!(2));
        assert_eq!(instance.render_count(), 2);
    }

    #[test]
    fn test_observed_attribute_change_rerenders() {
        let rt = Runtime::new(Mode::Development);
        define(&rt, GREETING, "src/hello-card.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "hello-card", &[("name", "Ada")]);

        rt.set_attribute(host, "name", "Grace");
        assert!(shadow_html(&rt, host).ends_with("<p>Hello Grace! 2</p>"));
        // not observed
        rt.set_attribute(host, "title", "x");
        assert_eq!(markup(&rt, host).render_count(), 2);
    }

    #[test]
    fn test_click_handler_invokes_method() {
        let source = r#"<template><button onclick="this.add(2)">{{ this.total }}</button></template>
<script>
this.total = 0
add(n) { this.total += n }
</script>"#;
        let rt = Runtime::new(Mode::Development);
        define(&rt, source, "src/adder-box.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "adder-box", &[]);

        for _ in 0..2 {
            let button = {
                let doc = rt.dom().borrow();
                let shadow = doc.shadow_root(host).unwrap();
                doc.query_selector(shadow, "button").unwrap()
            };
            rt.dom().dispatch(button, "click");
        }
        assert_eq!(shadow_html(&rt, host), "<button>4</button>");
    }

    #[test]
    fn test_lifecycle_methods_and_cleanup() {
        let source = r#"<template><span>{{ getState('session').user }}</span></template>
<script>
onMounted() { this.mounted = true }
onUnmounted() { getState('session').user = 'gone' }
</script>"#;
        let rt = Runtime::new(Mode::Development);
        let session = rt.create_state("session", json!({ "user": "ada" })).unwrap().unwrap();
        define(&rt, source, "src/session-view.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "session-view", &[]);

        let instance = markup(&rt, host);
        let element = instance.as_any().downcast_ref::<MarkupElement>().unwrap();
        assert_eq!(element.value("mounted"), Some(json!(true)));
        assert_eq!(element.subscriptions(), vec!["session"]);
        assert_eq!(session.store().subscriber_count(), 1);
        element.on_state_change("session", "user", Rc::new(|_: &Value, _: &Value, _: &str| {}));
        assert_eq!(session.store().hook_count(), 1);

        session.set("user", "grace");
        assert_eq!(shadow_html(&rt, host), "<span>grace</span>");

        rt.unmount(host);
        assert_eq!(session.store().subscriber_count(), 0);
        assert_eq!(session.store().hook_count(), 0);
        assert_eq!(session.get("user"), Some(json!("gone")));
        assert!(rt.instance(host).is_none());
    }

    #[test]
    fn test_instance_hooks_register_from_host_only() {
        let rt = Runtime::new(Mode::Development);
        let session = rt.create_state("session", json!({ "user": "ada" })).unwrap().unwrap();
        define(&rt, GREETING, "src/hello-card.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "hello-card", &[]);
        let instance = markup(&rt, host);
        let element = instance.as_any().downcast_ref::<MarkupElement>().unwrap();

        let err = element
            .call_method("onStateChange", vec![json!("session"), json!("user")])
            .unwrap_err();
        assert!(matches!(err, EvalError::UnknownMethod(ref m) if m == "onStateChange"));

        assert!(element
            .on_state_change("session", "user", Rc::new(|_: &Value, _: &Value, _: &str| {}))
            .is_some());
        assert_eq!(session.store().hook_count(), 1);
        rt.unmount(host);
        assert_eq!(session.store().hook_count(), 0);
    }

    #[test]
    fn test_failed_expression_renders_placeholder() {
        let source = "<template><p>{{ this.missing() }}</p><i>{{ 1 + 1 }}</i></template>";
        let rt = Runtime::new(Mode::Development);
        define(&rt, source, "src/broken-view.glint");
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "broken-view", &[]);
        let html = shadow_html(&rt, host);
        assert!(html.contains("[Expression Error: this.missing()]"));
        assert!(html.ends_with("<i>2</i>"));
    }

    #[test]
    fn test_nested_components_connect_inside_shadow_root() {
        let rt = Runtime::new(Mode::Development);
        define(&rt, GREETING, "src/hello-card.glint");
        define(
            &rt,
            "<template><section><hello-card name=\"Nested\"></hello-card></section></template>",
            "src/card-list.glint",
        );
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "card-list", &[]);
        assert_eq!(rt.instance_count(), 2);

        rt.unmount(host);
        assert_eq!(rt.instance_count(), 0);
    }

    fn function_runtime() -> (Runtime, NodeId) {
        let rt = Runtime::new(Mode::Development);
        rt.provide_function("Tally", |ctx: &RenderContext, props: &Map<String, Value>| {
            let (a, set_a) = ctx.use_state(0);
            let (b, _set_b) = ctx.use_state("x");
            ctx.use_handler("bump", move |_e: &mut Event, _args: Vec<Value>| {
                set_a.update(|v| json!(v.as_i64().unwrap_or(0) + 1));
            });
            let label = props.get("userName").and_then(Value::as_str).unwrap_or("?");
            format!("<button onclick=\"bump\">{}:{}:{}</button><em>{{{{ props.userName }}}}</em>", label, a, b)
        });
        rt.create_component("Tally", "tally-box", vec!["user-name".into()])
            .unwrap();
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "tally-box", &[("user-name", "ada")]);
        (rt, host)
    }

    #[test]
    fn test_function_component_slots_are_independent() {
        let (rt, host) = function_runtime();
        assert_eq!(shadow_html(&rt, host), "<button>ada:0:\"x\"</button><em>ada</em>");

        let button = {
            let doc = rt.dom().borrow();
            doc.query_selector(doc.shadow_root(host).unwrap(), "button").unwrap()
        };
        rt.dom().dispatch(button, "click");

        let instance = rt.instance(host).unwrap();
        let element = instance.as_any().downcast_ref::<FunctionElement>().unwrap();
        assert_eq!(element.slot(0), Some(json!(1)));
        assert_eq!(element.slot(1), Some(json!("x")));
        assert_eq!(element.handler_names(), vec!["bump"]);
    }

    #[test]
    fn test_function_component_attribute_change_rerenders() {
        let (rt, host) = function_runtime();
        rt.set_attribute(host, "user-name", "grace");
        assert!(shadow_html(&rt, host).ends_with("<em>grace</em>"));
        assert_eq!(rt.instance(host).unwrap().render_count(), 2);
    }

    #[test]
    fn test_setter_rerenders_even_when_unchanged() {
        let (rt, host) = function_runtime();
        let captured: Rc<RefCell<Option<StateSetter>>> = Rc::new(RefCell::new(None));
        let instance = rt.instance(host).unwrap();
        let element = instance.as_any().downcast_ref::<FunctionElement>().unwrap();
        let ctx = RenderContext {
            element: element.self_ref.upgrade().unwrap(),
            slot: Cell::new(1),
        };
        let (_, setter) = ctx.use_state("unused");
        *captured.borrow_mut() = Some(setter);

        let before = instance.render_count();
        if let Some(setter) = captured.borrow().as_ref() {
            setter.set("x");
        }
        assert_eq!(instance.render_count(), before + 1);
    }
}
