//! Virtual elements
//!
//! [`Element`] is the retained node a widget's `build()` produces. `render`
//! realizes it in the document once; `update` patches the realized node from a
//! newer element of the same tag and replaces it outright when the tag
//! changed. Children are always re-rendered wholesale: there is no keyed
//! child diff.

use serde_json::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::document::{Dom, Event, ListenerId, NodeId};
use crate::events::EventHandler;
use crate::widget::{resolve, Widget};

#[derive(Clone)]
pub enum PropValue {
    Str(String),
    Num(f64),
    Bool(bool),
    /// Shallow-assigned onto the node's inline style
    Style(BTreeMap<String, String>),
    /// Props named `on<event>` become listeners
    Handler(EventHandler),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Num(a), PropValue::Num(b)) => a == b,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Style(a), PropValue::Style(b)) => a == b,
            (PropValue::Handler(a), PropValue::Handler(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Str(s) => write!(f, "{:?}", s),
            PropValue::Num(n) => write!(f, "{}", n),
            PropValue::Bool(b) => write!(f, "{}", b),
            PropValue::Style(s) => write!(f, "{:?}", s),
            PropValue::Handler(_) => f.write_str("<handler>"),
        }
    }
}

impl PropValue {
    fn truthy(&self) -> bool {
        match self {
            PropValue::Str(s) => !s.is_empty(),
            PropValue::Num(n) => *n != 0.0 && !n.is_nan(),
            PropValue::Bool(b) => *b,
            PropValue::Style(_) | PropValue::Handler(_) => true,
        }
    }

    fn attribute_text(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            PropValue::Num(n) => n.to_string(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::Style(s) => s
                .iter()
                .map(|(k, v)| format!("{}: {};", k, v))
                .collect::<Vec<_>>()
                .join(" "),
            PropValue::Handler(_) => String::new(),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Str(s)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Num(n)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        PropValue::Num(n as f64)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

/// Child of an element: text, a nested element, or a widget not built yet.
pub enum Child {
    Text(String),
    Element(Element),
    Widget(Box<dyn Widget>),
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Child::Text(t) => write!(f, "{:?}", t),
            Child::Element(e) => std::fmt::Debug::fmt(e, f),
            Child::Widget(w) => write!(f, "<widget {}>", w.type_name()),
        }
    }
}

impl From<Element> for Child {
    fn from(e: Element) -> Self {
        Child::Element(e)
    }
}

impl From<&str> for Child {
    fn from(s: &str) -> Self {
        Child::Text(s.to_string())
    }
}

impl From<String> for Child {
    fn from(s: String) -> Self {
        Child::Text(s)
    }
}

impl Child {
    pub fn widget(widget: impl Widget + 'static) -> Self {
        Child::Widget(Box::new(widget))
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Child::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Realize this child under no parent. Widgets are built first.
    pub fn render(&mut self, dom: &Dom) -> NodeId {
        resolve(self);
        match self {
            Child::Text(text) => dom.borrow_mut().create_text(text),
            Child::Element(element) => element.render(dom),
            Child::Widget(widget) => {
                tracing::warn!(widget = widget.type_name(), "widget did not resolve; rendered as a comment");
                dom.borrow_mut().create_comment("unresolved widget")
            }
        }
    }
}

#[derive(Debug)]
pub struct Element {
    pub tag: String,
    pub props: BTreeMap<String, PropValue>,
    pub children: Vec<Child>,
    dom_node: Option<NodeId>,
    listeners: BTreeMap<String, ListenerId>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            props: BTreeMap::new(),
            children: Vec::new(),
            dom_node: None,
            listeners: BTreeMap::new(),
        }
    }

    pub fn prop(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.to_string(), value.into());
        self
    }

    /// `on<event>` listener prop.
    pub fn on(mut self, event: &str, handler: impl Fn(&mut Event, Vec<Value>) + 'static) -> Self {
        let mut chars = event.chars();
        let name = match chars.next() {
            Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
            None => "on".to_string(),
        };
        self.props
            .insert(name, PropValue::Handler(Rc::new(handler)));
        self
    }

    pub fn style(mut self, declarations: &[(&str, &str)]) -> Self {
        let map = declarations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.props.insert("style".to_string(), PropValue::Style(map));
        self
    }

    pub fn child(mut self, child: impl Into<Child>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.child(text)
    }

    pub fn dom_node(&self) -> Option<NodeId> {
        self.dom_node
    }

    // ─── render ──────────────────────────────────────────────────────────────

    /// First-time materialization; returns the new, parentless node.
    pub fn render(&mut self, dom: &Dom) -> NodeId {
        let node = dom.borrow_mut().create_element(&self.tag);
        self.dom_node = Some(node);
        self.listeners.clear();

        let props: Vec<(String, PropValue)> = self
            .props
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in &props {
            self.apply_prop(dom, node, name, value);
        }

        self.render_children(dom, node);
        node
    }

    fn render_children(&mut self, dom: &Dom, node: NodeId) {
        for child in &mut self.children {
            let realized = child.render(dom);
            dom.borrow_mut().append_child(node, realized);
        }
    }

    fn apply_prop(&mut self, dom: &Dom, node: NodeId, name: &str, value: &PropValue) {
        match value {
            PropValue::Handler(handler) => {
                let Some(event) = name.strip_prefix("on").filter(|e| !e.is_empty()) else {
                    tracing::warn!(prop = name, "handler prop without an `on` prefix; ignored");
                    return;
                };
                let handler = handler.clone();
                let listener = Rc::new(move |e: &mut Event| {
                    let args = vec![e.to_value()];
                    handler(e, args);
                });
                let id = dom
                    .borrow_mut()
                    .add_event_listener(node, &event.to_lowercase(), listener);
                if let Some(id) = id {
                    self.listeners.insert(name.to_string(), id);
                }
            }
            PropValue::Style(style) => {
                let mut doc = dom.borrow_mut();
                for (property, v) in style {
                    doc.set_style(node, property, v);
                }
            }
            _ if name == "className" => {
                dom.borrow_mut()
                    .set_attribute(node, "class", &value.attribute_text());
            }
            _ if name == "disabled" => {
                if value.truthy() {
                    let mut doc = dom.borrow_mut();
                    doc.set_attribute(node, "disabled", "");
                    doc.set_property(node, "disabled", Value::Bool(true));
                }
            }
            _ => {
                dom.borrow_mut()
                    .set_attribute(node, name, &value.attribute_text());
            }
        }
    }

    /// Undo what `apply_prop` did for a prop that is going away.
    fn remove_prop(&mut self, dom: &Dom, node: NodeId, name: &str, value: &PropValue) {
        let mut doc = dom.borrow_mut();
        match value {
            PropValue::Handler(_) => {
                if let Some(id) = self.listeners.remove(name) {
                    doc.remove_event_listener(node, id);
                }
            }
            PropValue::Style(_) => doc.clear_style(node),
            _ if name == "className" => {
                doc.remove_attribute(node, "class");
            }
            _ if name == "disabled" => {
                doc.remove_attribute(node, "disabled");
                doc.remove_property(node, "disabled");
            }
            _ => {
                doc.remove_attribute(node, name);
            }
        }
    }

    // ─── update ──────────────────────────────────────────────────────────────

    /// Patch the realized node to match `next`, then take `next`'s place.
    /// Returns the node now representing this element.
    pub fn update(&mut self, dom: &Dom, next: Element) -> NodeId {
        let Some(node) = self.dom_node else {
            *self = next;
            return self.render(dom);
        };

        if self.tag != next.tag {
            let mut next = next;
            let replacement = next.render(dom);
            {
                let mut doc = dom.borrow_mut();
                doc.replace_child(replacement, node);
                doc.release(node);
            }
            tracing::debug!(from = %self.tag, to = %next.tag, "element replaced");
            *self = next;
            return replacement;
        }

        let Element {
            props: next_props,
            children: next_children,
            ..
        } = next;
        let old_props = std::mem::take(&mut self.props);

        for (name, value) in &old_props {
            let keep = match next_props.get(name) {
                None => false,
                Some(PropValue::Handler(_)) => true,
                Some(_) => !matches!(value, PropValue::Handler(_)),
            };
            if !keep {
                self.remove_prop(dom, node, name, value);
            }
        }

        for (name, value) in &next_props {
            match value {
                PropValue::Handler(_) => {
                    if let Some(id) = self.listeners.remove(name) {
                        dom.borrow_mut().remove_event_listener(node, id);
                    }
                    self.apply_prop(dom, node, name, value);
                }
                _ if old_props.get(name) != Some(value) => self.apply_prop(dom, node, name, value),
                _ => {}
            }
        }
        self.props = next_props;

        dom.borrow_mut().release_children(node);
        self.children = next_children;
        self.render_children(dom, node);
        node
    }
}
