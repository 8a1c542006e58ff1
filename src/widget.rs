//! Widgets
//!
//! A [`Widget`] builds a [`Child`]: text, an [`Element`] whose children may
//! hold more widgets, or another widget. [`resolve`] builds widgets until only
//! elements and text remain, rewriting children lists in place. A
//! [`WidgetRoot`] owns the realized tree under a container node and patches it
//! when a new widget arrives.

use serde_json::{Map, Value};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::component::CustomElement;
use crate::document::{Dom, NodeId};
use crate::element::{Child, Element};
use crate::parse::kebab_to_camel;
use crate::runtime::Runtime;

pub trait Widget {
    fn build(&self) -> Child;

    /// Identity used to decide between patching and replacing.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Build a widget-backed custom element's widget from its props.
pub type WidgetFactory = Rc<dyn Fn(&Map<String, Value>) -> Box<dyn Widget>>;

/// Build widgets until `child` is text or an element, then do the same for
/// the element's children.
pub fn resolve(child: &mut Child) {
    while let Child::Widget(widget) = child {
        let built = widget.build();
        *child = built;
    }
    if let Child::Element(element) = child {
        for nested in &mut element.children {
            resolve(nested);
        }
    }
}

/// Build `widget` and resolve the result.
pub fn build_tree(widget: &dyn Widget) -> Child {
    let mut tree = widget.build();
    resolve(&mut tree);
    tree
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROOT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct WidgetRoot {
    dom: Dom,
    container: NodeId,
    widget: Option<Box<dyn Widget>>,
    tree: Option<Child>,
    node: Option<NodeId>,
    builds: usize,
}

impl std::fmt::Debug for WidgetRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRoot")
            .field("container", &self.container)
            .field("widget", &self.widget.as_ref().map(|w| w.type_name()))
            .field("node", &self.node)
            .field("builds", &self.builds)
            .finish()
    }
}

impl WidgetRoot {
    pub fn new(dom: Dom, container: NodeId) -> Self {
        Self {
            dom,
            container,
            widget: None,
            tree: None,
            node: None,
            builds: 0,
        }
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn tree(&self) -> Option<&Child> {
        self.tree.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.node.is_some()
    }

    /// How many times a widget was built into this root.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn mount(&mut self, widget: Box<dyn Widget>) -> NodeId {
        self.unmount();
        let mut tree = build_tree(widget.as_ref());
        self.builds += 1;
        let node = tree.render(&self.dom);
        self.dom.borrow_mut().append_child(self.container, node);
        tracing::debug!(widget = widget.type_name(), node = node.0, "widget mounted");
        self.widget = Some(widget);
        self.tree = Some(tree);
        self.node = Some(node);
        node
    }

    /// Patch to `widget`. A different widget type, or a root that is not an
    /// element on both sides, is replaced outright.
    pub fn update(&mut self, widget: Box<dyn Widget>) -> NodeId {
        let (Some(old_widget), Some(old_node)) = (self.widget.as_ref(), self.node) else {
            return self.mount(widget);
        };

        let next = build_tree(widget.as_ref());
        self.builds += 1;
        let same_type = old_widget.type_name() == widget.type_name();
        let node = self.patch_or_replace(old_node, next, same_type);
        if !same_type {
            tracing::debug!(widget = widget.type_name(), "widget root replaced");
        }

        self.widget = Some(widget);
        self.node = Some(node);
        node
    }

    /// Rebuild the current widget, e.g. after its state changed.
    pub fn rebuild(&mut self) -> Option<NodeId> {
        let old_node = self.node?;
        let widget = self.widget.as_ref()?;
        let next = build_tree(widget.as_ref());
        self.builds += 1;
        let node = self.patch_or_replace(old_node, next, true);
        self.node = Some(node);
        Some(node)
    }

    /// Element-to-element with `patch` set updates in place; anything else
    /// renders `next` and swaps it in for `old_node`.
    fn patch_or_replace(&mut self, old_node: NodeId, next: Child, patch: bool) -> NodeId {
        match (self.tree.take(), next) {
            (Some(Child::Element(mut current)), Child::Element(next_element)) if patch => {
                let node = current.update(&self.dom, next_element);
                self.tree = Some(Child::Element(current));
                node
            }
            (_, mut other) => {
                let replacement = other.render(&self.dom);
                let mut doc = self.dom.borrow_mut();
                doc.replace_child(replacement, old_node);
                doc.release(old_node);
                drop(doc);
                self.tree = Some(other);
                replacement
            }
        }
    }

    pub fn unmount(&mut self) {
        if let Some(node) = self.node.take() {
            let mut doc = self.dom.borrow_mut();
            doc.remove_child(self.container, node);
            doc.release(node);
            tracing::debug!(node = node.0, "widget unmounted");
        }
        self.tree = None;
        self.widget = None;
    }
}

/// Mount `widget` under `container` and hand back the shared root.
pub fn run_app(dom: &Dom, container: NodeId, widget: Box<dyn Widget>) -> Rc<RefCell<WidgetRoot>> {
    let mut root = WidgetRoot::new(dom.clone(), container);
    root.mount(widget);
    Rc::new(RefCell::new(root))
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// `setState` for stateful widgets. The attached root is rebuilt only when
/// the serialized state actually changed.
#[derive(Clone, Default)]
pub struct WidgetState {
    state: Rc<RefCell<Map<String, Value>>>,
    root: Rc<RefCell<Option<Weak<RefCell<WidgetRoot>>>>>,
}

impl std::fmt::Debug for WidgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetState")
            .field("state", &self.state.borrow())
            .finish()
    }
}

impl WidgetState {
    pub fn new(initial: Value) -> Self {
        let state = match initial {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            root: Rc::new(RefCell::new(None)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.borrow().get(key).cloned()
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.state.borrow().clone())
    }

    pub fn attach(&self, root: &Rc<RefCell<WidgetRoot>>) {
        *self.root.borrow_mut() = Some(Rc::downgrade(root));
    }

    /// Merge `partial`; returns whether the root was rebuilt.
    pub fn set_state(&self, partial: Map<String, Value>) -> bool {
        let before = serde_json::to_string(&*self.state.borrow()).unwrap_or_default();
        {
            let mut state = self.state.borrow_mut();
            for (key, value) in partial {
                state.insert(key, value);
            }
        }
        let after = serde_json::to_string(&*self.state.borrow()).unwrap_or_default();
        if before == after {
            return false;
        }
        self.rebuild_root()
    }

    pub fn update(&self, updater: impl FnOnce(&Value) -> Value) -> bool {
        match updater(&self.snapshot()) {
            Value::Object(partial) => self.set_state(partial),
            other => {
                tracing::warn!(result = %other, "widget state updater must return an object; ignored");
                false
            }
        }
    }

    fn rebuild_root(&self) -> bool {
        let Some(root) = self.root.borrow().as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        let Ok(mut root) = root.try_borrow_mut() else {
            tracing::warn!("setState during a build; rebuild skipped");
            return false;
        };
        root.rebuild().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUSTOM ELEMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A widget root living in a host element's shadow root. Attributes are the
/// widget's props.
pub struct WidgetElement {
    runtime: Runtime,
    host: NodeId,
    root: Rc<RefCell<WidgetRoot>>,
    build: WidgetFactory,
    connected: Cell<bool>,
    renders: Cell<usize>,
}

impl WidgetElement {
    pub fn new(runtime: Runtime, host: NodeId, build: WidgetFactory) -> Rc<Self> {
        let container = runtime
            .dom()
            .borrow_mut()
            .attach_shadow(host)
            .unwrap_or(host);
        let root = WidgetRoot::new(runtime.dom().clone(), container);
        Rc::new(Self {
            runtime,
            host,
            root: Rc::new(RefCell::new(root)),
            build,
            connected: Cell::new(false),
            renders: Cell::new(0),
        })
    }

    pub fn root(&self) -> &Rc<RefCell<WidgetRoot>> {
        &self.root
    }

    fn props(&self) -> Map<String, Value> {
        self.runtime
            .dom()
            .borrow()
            .attributes(self.host)
            .into_iter()
            .map(|(name, value)| (kebab_to_camel(&name), Value::String(value)))
            .collect()
    }
}

impl CustomElement for WidgetElement {
    fn host(&self) -> NodeId {
        self.host
    }

    fn connected(&self) {
        self.connected.set(true);
        let widget = (self.build)(&self.props());
        self.renders.set(self.renders.get() + 1);
        self.root.borrow_mut().mount(widget);
    }

    fn disconnected(&self) {
        self.connected.set(false);
        self.root.borrow_mut().unmount();
    }

    fn attribute_changed(&self, _name: &str, old: Option<&str>, new: Option<&str>) {
        if old != new {
            self.render();
        }
    }

    fn render(&self) {
        if !self.connected.get() {
            return;
        }
        let widget = (self.build)(&self.props());
        self.renders.set(self.renders.get() + 1);
        match self.root.try_borrow_mut() {
            Ok(mut root) => {
                root.update(widget);
            }
            Err(_) => tracing::warn!(host = self.host.0, "widget root busy; update skipped"),
        }
    }

    fn render_count(&self) -> usize {
        self.renders.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::document::Event;
    use serde_json::json;

    struct Label(String);

    impl Widget for Label {
        fn build(&self) -> Child {
            Element::new("span").text(&self.0).into()
        }
    }

    struct Wrapper(String);

    impl Widget for Wrapper {
        fn build(&self) -> Child {
            Child::widget(Label(self.0.clone()))
        }
    }

    struct Card {
        title: String,
        body: String,
    }

    impl Widget for Card {
        fn build(&self) -> Child {
            Element::new("section")
                .child(Child::widget(Label(self.title.clone())))
                .child(Element::new("p").text(&self.body))
                .into()
        }
    }

    struct Counter {
        state: WidgetState,
    }

    impl Widget for Counter {
        fn build(&self) -> Child {
            let count = self.state.get("count").unwrap_or(json!(0));
            let state = self.state.clone();
            Element::new("button")
                .on("click", move |_e: &mut Event, _args: Vec<Value>| {
                    state.update(|s| json!({ "count": s["count"].as_i64().unwrap_or(0) + 1 }));
                })
                .text(&count.to_string())
                .into()
        }
    }

    #[test]
    fn test_resolve_nested_widgets_in_place() {
        let mut tree = Child::widget(Card {
            title: "T".into(),
            body: "B".into(),
        });
        resolve(&mut tree);
        let section = tree.as_element().unwrap();
        assert_eq!(section.tag, "section");
        assert!(matches!(&section.children[0], Child::Element(e) if e.tag == "span"));

        let mut chain = Child::widget(Wrapper("x".into()));
        resolve(&mut chain);
        assert_eq!(chain.as_element().map(|e| e.tag.as_str()), Some("span"));
    }

    #[test]
    fn test_root_update_patches_same_type() {
        let dom = Dom::new();
        let body = dom.borrow().body();
        let root = run_app(&dom, body, Box::new(Label("a".into())));
        let first = root.borrow().node().unwrap();

        let second = root.borrow_mut().update(Box::new(Label("b".into())));
        assert_eq!(first, second);
        assert_eq!(dom.borrow().inner_html(body), "<span>b</span>");
    }

    #[test]
    fn test_root_update_replaces_other_type() {
        let dom = Dom::new();
        let body = dom.borrow().body();
        let root = run_app(&dom, body, Box::new(Label("a".into())));
        let first = root.borrow().node().unwrap();

        let next = root.borrow_mut().update(Box::new(Card {
            title: "t".into(),
            body: "b".into(),
        }));
        assert_ne!(first, next);
        assert_eq!(dom.borrow().inner_html(body), "<section><span>t</span><p>b</p></section>");

        root.borrow_mut().unmount();
        assert_eq!(dom.borrow().inner_html(body), "");
    }

    #[test]
    fn test_set_state_rebuilds_only_on_change() {
        let dom = Dom::new();
        let body = dom.borrow().body();
        let state = WidgetState::new(json!({ "count": 0 }));
        let root = run_app(&dom, body, Box::new(Counter { state: state.clone() }));
        state.attach(&root);

        let button = root.borrow().node().unwrap();
        dom.dispatch(button, "click");
        dom.dispatch(button, "click");
        assert_eq!(dom.borrow().inner_html(body), "<button>2</button>");
        assert_eq!(root.borrow().builds(), 3);

        assert!(!state.set_state(json!({ "count": 2 }).as_object().cloned().unwrap()));
        assert_eq!(root.borrow().builds(), 3);
    }

    #[test]
    fn test_widget_custom_element_props() {
        let rt = Runtime::new(Mode::Development);
        let factory: WidgetFactory = Rc::new(|props: &Map<String, Value>| {
            let text = props.get("userName").and_then(Value::as_str).unwrap_or("").to_string();
            Box::new(Label(text)) as Box<dyn Widget>
        });
        rt.define_widget("name-tag", vec!["user-name".into()], factory).unwrap();
        let body = rt.dom().borrow().body();
        let host = rt.mount(body, "name-tag", &[("user-name", "ada")]);

        let html = || {
            let doc = rt.dom().borrow();
            doc.inner_html(doc.shadow_root(host).unwrap())
        };
        assert_eq!(html(), "<span>ada</span>");
        rt.set_attribute(host, "user-name", "grace");
        assert_eq!(html(), "<span>grace</span>");

        rt.unmount(host);
        assert_eq!(html(), "");
    }
}
