//! Document model
//!
//! An arena DOM the runtime renders into: elements, text, comments and shadow
//! roots addressed by [`NodeId`]. Markup is parsed with html5ever and
//! converted node by node; listeners live on the nodes and events bubble from
//! the target up through shadow hosts.

use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, parse_fragment, QualName};
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Inline style set through the style object, serialized as `style`
    pub style: BTreeMap<String, String>,
    /// DOM properties (`disabled`, `value`, ...) that are not attributes
    pub properties: BTreeMap<String, Value>,
    pub shadow_root: Option<NodeId>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
    ShadowRoot { host: NodeId },
}

pub type Listener = Rc<dyn Fn(&mut Event)>;
pub type ListenerId = u64;

struct ListenerEntry {
    id: ListenerId,
    event_type: String,
    callback: Listener,
}

struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
    listeners: Vec<ListenerEntry>,
    /// Bumped each time the slot is released
    generation: u32,
    free: bool,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            data,
            listeners: Vec::new(),
            generation: 0,
            free: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub target: NodeId,
    pub current_target: NodeId,
    pub detail: Value,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    pub fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            detail: Value::Null,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Shape handed to sandboxed handlers as their `event` argument.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.event_type,
            "target": self.target.0,
            "detail": self.detail,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Document {
    nodes: Vec<Node>,
    /// Released slots, reused by the next allocation
    free: Vec<usize>,
    body: NodeId,
    next_listener: ListenerId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.live_count())
            .field("body", &self.inner_html(self.body))
            .finish()
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Node::new(NodeData::Document)],
            free: Vec::new(),
            body: NodeId::ROOT,
            next_listener: 1,
        };
        let body = doc.create_element("body");
        doc.append_child(NodeId::ROOT, body);
        doc.body = body;
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Allocated slots, released ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).is_some_and(|n| !n.free)
    }

    fn generation(&self, id: NodeId) -> Option<u32> {
        self.nodes.get(id.0).map(|n| n.generation)
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        if let Some(index) = self.free.pop() {
            let node = &mut self.nodes[index];
            node.data = data;
            node.free = false;
            return NodeId(index);
        }
        self.nodes.push(Node::new(data));
        NodeId(self.nodes.len() - 1)
    }

    /// Free a detached subtree, shadow trees included, dropping its listeners.
    /// The slots are reused by later allocations, so ids into the subtree must
    /// not be used afterwards. Attached nodes are left alone. Returns the
    /// number of nodes freed.
    pub fn release(&mut self, id: NodeId) -> usize {
        if id == NodeId::ROOT || !self.is_live(id) || self.parent(id).is_some() {
            return 0;
        }
        let mut stack = vec![id];
        let mut freed = 0;
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get_mut(next.0) else {
                continue;
            };
            if node.free {
                continue;
            }
            stack.append(&mut node.children);
            if let NodeData::Element(ElementData { shadow_root: Some(shadow), .. }) = &node.data {
                stack.push(*shadow);
            }
            node.data = NodeData::Comment(String::new());
            node.listeners.clear();
            node.parent = None;
            node.free = true;
            node.generation = node.generation.wrapping_add(1);
            self.free.push(next.0);
            freed += 1;
        }
        freed
    }

    /// Detach and free every child of `id`.
    pub fn release_children(&mut self, id: NodeId) -> usize {
        self.clear_children(id)
            .into_iter()
            .map(|child| self.release(child))
            .sum()
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(ElementData::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id) {
            Some(NodeData::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.data) {
            Some(NodeData::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    // ─── tree ────────────────────────────────────────────────────────────────

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.parent = None;
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.is_live(parent) || !self.is_live(child) || parent == child {
            return;
        }
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.parent(child) != Some(parent) {
            return false;
        }
        self.detach(child);
        true
    }

    /// Put `new` where `old` is. No-op when `old` is detached.
    pub fn replace_child(&mut self, new: NodeId, old: NodeId) -> bool {
        let Some(parent) = self.parent(old) else {
            return false;
        };
        self.detach(new);
        let siblings = &mut self.nodes[parent.0].children;
        let Some(index) = siblings.iter().position(|c| *c == old) else {
            return false;
        };
        siblings[index] = new;
        self.nodes[new.0].parent = Some(parent);
        self.nodes[old.0].parent = None;
        true
    }

    pub fn clear_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return Vec::new();
        };
        let removed = std::mem::take(&mut node.children);
        for child in &removed {
            self.nodes[child.0].parent = None;
        }
        removed
    }

    /// Pre-order descendants, not crossing into shadow roots.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Pre-order descendants including shadow trees, each shadow root's
    /// content visited right after its host.
    pub fn composed_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        if let Some(shadow) = self.shadow_root(id) {
            stack.push(shadow);
        }
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
            if let Some(shadow) = self.shadow_root(next) {
                stack.push(shadow);
            }
        }
        out
    }

    /// Parent, or the host when `id` is a shadow root.
    pub fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        match self.data(id) {
            Some(NodeData::ShadowRoot { host }) => Some(*host),
            _ => self.parent(id),
        }
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == NodeId::ROOT {
                return true;
            }
            match self.composed_parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    // ─── shadow roots ────────────────────────────────────────────────────────

    /// Open shadow root for `host`, created on first call.
    pub fn attach_shadow(&mut self, host: NodeId) -> Option<NodeId> {
        if let Some(existing) = self.shadow_root(host) {
            return Some(existing);
        }
        self.element(host)?;
        let root = self.push(NodeData::ShadowRoot { host });
        if let Some(e) = self.element_mut(host) {
            e.shadow_root = Some(root);
        }
        Some(root)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.element(host).and_then(|e| e.shadow_root)
    }

    // ─── attributes, style, properties ───────────────────────────────────────

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<String> {
        self.element(id).and_then(|e| e.attr(name)).map(str::to_string)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.element(id).map_or(false, |e| e.attr(name).is_some())
    }

    pub fn attributes(&self, id: NodeId) -> Vec<(String, String)> {
        self.element(id).map(|e| e.attrs.clone()).unwrap_or_default()
    }

    /// Returns the previous value.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Option<String> {
        let e = self.element_mut(id)?;
        match e.attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => Some(std::mem::replace(v, value.to_string())),
            None => {
                e.attrs.push((name.to_string(), value.to_string()));
                None
            }
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        let e = self.element_mut(id)?;
        let index = e.attrs.iter().position(|(n, _)| n == name)?;
        Some(e.attrs.remove(index).1)
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) {
        if let Some(e) = self.element_mut(id) {
            e.style.insert(property.to_string(), value.to_string());
        }
    }

    pub fn clear_style(&mut self, id: NodeId) {
        if let Some(e) = self.element_mut(id) {
            e.style.clear();
        }
    }

    pub fn style(&self, id: NodeId) -> BTreeMap<String, String> {
        self.element(id).map(|e| e.style.clone()).unwrap_or_default()
    }

    pub fn set_property(&mut self, id: NodeId, name: &str, value: Value) {
        if let Some(e) = self.element_mut(id) {
            e.properties.insert(name.to_string(), value);
        }
    }

    pub fn property(&self, id: NodeId, name: &str) -> Option<Value> {
        self.element(id).and_then(|e| e.properties.get(name).cloned())
    }

    pub fn remove_property(&mut self, id: NodeId, name: &str) -> Option<Value> {
        self.element_mut(id).and_then(|e| e.properties.remove(name))
    }

    // ─── text ────────────────────────────────────────────────────────────────

    pub fn text_content(&self, id: NodeId) -> String {
        match self.data(id) {
            Some(NodeData::Text(t)) => t.clone(),
            Some(NodeData::Comment(_)) | None => String::new(),
            Some(_) => self
                .children(id)
                .iter()
                .map(|c| self.text_content(*c))
                .collect(),
        }
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        if let Some(NodeData::Text(t)) = self.nodes.get_mut(id.0).map(|n| &mut n.data) {
            *t = text.to_string();
            return;
        }
        self.release_children(id);
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node);
        }
    }

    // ─── listeners ───────────────────────────────────────────────────────────

    pub fn add_event_listener(&mut self, id: NodeId, event_type: &str, callback: Listener) -> Option<ListenerId> {
        let listener_id = self.next_listener;
        let node = self.nodes.get_mut(id.0)?;
        node.listeners.push(ListenerEntry {
            id: listener_id,
            event_type: event_type.to_string(),
            callback,
        });
        self.next_listener += 1;
        Some(listener_id)
    }

    pub fn remove_event_listener(&mut self, id: NodeId, listener: ListenerId) -> bool {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        let before = node.listeners.len();
        node.listeners.retain(|l| l.id != listener);
        node.listeners.len() != before
    }

    pub fn listener_count(&self, id: NodeId, event_type: &str) -> usize {
        self.nodes.get(id.0).map_or(0, |n| {
            n.listeners
                .iter()
                .filter(|l| l.event_type == event_type)
                .count()
        })
    }

    fn listeners(&self, id: NodeId, event_type: &str) -> Vec<Listener> {
        self.nodes.get(id.0).map_or_else(Vec::new, |n| {
            n.listeners
                .iter()
                .filter(|l| l.event_type == event_type)
                .map(|l| l.callback.clone())
                .collect()
        })
    }

    fn propagation_path(&self, target: NodeId) -> Vec<NodeId> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(parent) = self.composed_parent(current) {
            path.push(parent);
            current = parent;
        }
        path
    }

    // ─── markup ──────────────────────────────────────────────────────────────

    /// Replace the children of `id` with parsed `html`. Returns the new
    /// top-level nodes.
    pub fn set_inner_html(&mut self, id: NodeId, html: &str) -> Vec<NodeId> {
        self.release_children(id);
        if html.is_empty() {
            return Vec::new();
        }

        let dom = parse_fragment(
            RcDom::default(),
            Default::default(),
            QualName::new(None, ns!(html), local_name!("div")),
            vec![],
        )
        .one(html);

        let Some(context) = dom.document.children.borrow().first().cloned() else {
            return Vec::new();
        };
        let children = context.children.borrow();
        for child in children.iter() {
            self.convert_node(child, id);
        }
        self.children(id).to_vec()
    }

    fn convert_node(&mut self, handle: &Handle, parent: NodeId) {
        match &handle.data {
            RcNodeData::Text { contents } => {
                let node = self.create_text(&contents.borrow());
                self.append_child(parent, node);
            }
            RcNodeData::Comment { contents } => {
                let node = self.create_comment(contents);
                self.append_child(parent, node);
            }
            RcNodeData::Element { name, attrs, template_contents, .. } => {
                let node = self.create_element(&name.local);
                if let Some(e) = self.element_mut(node) {
                    for attr in attrs.borrow().iter() {
                        e.attrs.push((attr.name.local.to_string(), attr.value.to_string()));
                    }
                }
                self.append_child(parent, node);
                let contents = template_contents.borrow().clone();
                let source = contents.unwrap_or_else(|| handle.clone());
                for child in source.children.borrow().iter() {
                    self.convert_node(child, node);
                }
            }
            RcNodeData::Document
            | RcNodeData::Doctype { .. }
            | RcNodeData::ProcessingInstruction { .. } => {}
        }
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        let raw_text = matches!(self.tag_name(id), Some("style") | Some("script"));
        for child in self.children(id) {
            self.serialize(*child, raw_text, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize(id, false, &mut out);
        out
    }

    fn serialize(&self, id: NodeId, raw_text: bool, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(t)) => {
                if raw_text {
                    out.push_str(t);
                } else {
                    out.push_str(&escape_text(t));
                }
            }
            Some(NodeData::Comment(c)) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            Some(NodeData::Element(e)) => {
                out.push('<');
                out.push_str(&e.tag);
                for (name, value) in &e.attrs {
                    if name == "style" && !e.style.is_empty() {
                        continue;
                    }
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                if !e.style.is_empty() {
                    let css: Vec<String> = e
                        .style
                        .iter()
                        .map(|(k, v)| format!("{}: {};", k, v))
                        .collect();
                    out.push_str(&format!(" style=\"{}\"", escape_attr(&css.join(" "))));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&e.tag.as_str()) {
                    return;
                }
                out.push_str(&self.inner_html(id));
                out.push_str("</");
                out.push_str(&e.tag);
                out.push('>');
            }
            Some(NodeData::Document) | Some(NodeData::ShadowRoot { .. }) => {
                out.push_str(&self.inner_html(id));
            }
            None => {}
        }
    }

    // ─── selectors ───────────────────────────────────────────────────────────

    /// Elements under `scope` matching a simple selector: `tag`, `#id`,
    /// `.class`, `[attr]` or `[attr=value]`.
    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Vec<NodeId> {
        let selector = selector.trim();
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.matches(*id, selector))
            .collect()
    }

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Option<NodeId> {
        self.query_selector_all(scope, selector).into_iter().next()
    }

    pub fn matches(&self, id: NodeId, selector: &str) -> bool {
        let Some(e) = self.element(id) else {
            return false;
        };
        if let Some(rest) = selector.strip_prefix('#') {
            return e.attr("id") == Some(rest);
        }
        if let Some(rest) = selector.strip_prefix('.') {
            return e
                .attr("class")
                .map_or(false, |c| c.split_whitespace().any(|cls| cls == rest));
        }
        if let Some(inner) = selector.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return match inner.split_once('=') {
                Some((name, value)) => {
                    let value = value.trim_matches(|c| c == '"' || c == '\'');
                    e.attr(name.trim()) == Some(value)
                }
                None => e.attr(inner.trim()).is_some(),
            };
        }
        e.tag.eq_ignore_ascii_case(selector)
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\u{a0}', "&nbsp;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\u{a0}', "&nbsp;")
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared document handle. Borrows are kept short so listeners can mutate the
/// document while an event is being dispatched.
#[derive(Clone, Default)]
pub struct Dom(Rc<RefCell<Document>>);

impl std::fmt::Debug for Dom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0.borrow(), f)
    }
}

impl Dom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow(&self) -> Ref<'_, Document> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Document> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Dom) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn dispatch(&self, target: NodeId, event_type: &str) -> Event {
        self.dispatch_event(Event::new(event_type, target))
    }

    /// Run listeners on the target, then on each ancestor, until one stops
    /// propagation.
    pub fn dispatch_event(&self, mut event: Event) -> Event {
        let path: Vec<(NodeId, Option<u32>)> = {
            let doc = self.borrow();
            doc.propagation_path(event.target)
                .into_iter()
                .map(|n| (n, doc.generation(n)))
                .collect()
        };
        for (node, generation) in path {
            // a listener may have re-rendered and released this node
            if self.borrow().generation(node) != generation {
                continue;
            }
            let listeners = self.borrow().listeners(node, &event.event_type);
            if listeners.is_empty() {
                continue;
            }
            event.current_target = node;
            for listener in listeners {
                listener(&mut event);
            }
            if event.propagation_stopped {
                break;
            }
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_inner_html_round_trip() {
        let mut doc = Document::new();
        let host = doc.create_element("div");
        doc.append_child(doc.body(), host);
        doc.set_inner_html(host, "<p class=\"a\">Hi &amp; bye</p><br><span>x</span>");
        assert_eq!(
            doc.inner_html(host),
            "<p class=\"a\">Hi &amp; bye</p><br><span>x</span>"
        );
        assert_eq!(doc.element_children(host).len(), 3);
        assert_eq!(doc.text_content(host), "Hi & byex");
    }

    #[test]
    fn test_style_element_is_raw_text() {
        let mut doc = Document::new();
        let root = doc.create_element("div");
        doc.set_inner_html(root, "<style>a > b { color: red; }</style><p>1</p>");
        assert_eq!(doc.inner_html(root), "<style>a > b { color: red; }</style><p>1</p>");
    }

    #[test]
    fn test_attributes() {
        let mut doc = Document::new();
        let el = doc.create_element("button");
        assert_eq!(doc.set_attribute(el, "onclick", "go()"), None);
        assert_eq!(doc.set_attribute(el, "onclick", "stop()").as_deref(), Some("go()"));
        assert!(doc.has_attribute(el, "onclick"));
        assert_eq!(doc.remove_attribute(el, "onclick").as_deref(), Some("stop()"));
        assert!(!doc.has_attribute(el, "onclick"));
    }

    #[test]
    fn test_style_map_serializes_as_attribute() {
        let mut doc = Document::new();
        let el = doc.create_element("div");
        doc.set_style(el, "color", "red");
        doc.set_style(el, "padding", "4px");
        assert_eq!(doc.outer_html(el), "<div style=\"color: red; padding: 4px;\"></div>");
    }

    #[test]
    fn test_replace_child_keeps_position() {
        let mut doc = Document::new();
        let parent = doc.create_element("ul");
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        let c = doc.create_element("p");
        doc.append_child(parent, a);
        doc.append_child(parent, b);
        assert!(doc.replace_child(c, a));
        assert_eq!(doc.children(parent), &[c, b]);
        assert_eq!(doc.parent(a), None);
    }

    #[test]
    fn test_query_selectors() {
        let mut doc = Document::new();
        let root = doc.create_element("div");
        doc.set_inner_html(
            root,
            "<ul id=\"list\"><li class=\"item done\">a</li><li class=\"item\" data-k=\"2\">b</li></ul>",
        );
        assert_eq!(doc.query_selector_all(root, "li").len(), 2);
        assert_eq!(doc.query_selector_all(root, ".done").len(), 1);
        assert!(doc.query_selector(root, "#list").is_some());
        assert_eq!(doc.query_selector_all(root, "[data-k]").len(), 1);
        assert_eq!(doc.query_selector_all(root, "[data-k='2']").len(), 1);
    }

    #[test]
    fn test_shadow_root_connection() {
        let mut doc = Document::new();
        let host = doc.create_element("my-card");
        let shadow = doc.attach_shadow(host).unwrap();
        assert_eq!(doc.attach_shadow(host), Some(shadow));
        let inner = doc.create_element("p");
        doc.append_child(shadow, inner);
        assert!(!doc.is_connected(inner));
        doc.append_child(doc.body(), host);
        assert!(doc.is_connected(inner));
    }

    #[test]
    fn test_composed_descendants_enter_shadow_roots() {
        let mut doc = Document::new();
        let host = doc.create_element("x-card");
        let body = doc.body();
        doc.append_child(body, host);
        let shadow = doc.attach_shadow(host).unwrap();
        doc.set_inner_html(shadow, "<p><b>hi</b></p>");
        let after = doc.create_element("span");
        doc.append_child(body, after);

        let tags: Vec<String> = doc
            .composed_descendants(body)
            .into_iter()
            .map(|n| match doc.data(n) {
                Some(NodeData::Element(e)) => e.tag.clone(),
                Some(NodeData::ShadowRoot { .. }) => "#shadow".to_string(),
                _ => "#text".to_string(),
            })
            .filter(|t| t != "#text")
            .collect();
        assert_eq!(tags, vec!["x-card", "#shadow", "p", "b", "span"]);
        assert!(!doc.descendants(body).contains(&shadow));
    }

    #[test]
    fn test_events_bubble_through_shadow_host() {
        let dom = Dom::new();
        let (host, button) = {
            let mut doc = dom.borrow_mut();
            let host = doc.create_element("my-card");
            let body = doc.body();
            doc.append_child(body, host);
            let shadow = doc.attach_shadow(host).unwrap();
            let button = doc.create_element("button");
            doc.append_child(shadow, button);
            (host, button)
        };

        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        dom.borrow_mut()
            .add_event_listener(host, "click", Rc::new(move |_e: &mut Event| h.set(h.get() + 1)));
        let h = hits.clone();
        dom.borrow_mut()
            .add_event_listener(button, "click", Rc::new(move |_e: &mut Event| h.set(h.get() + 10)));

        dom.dispatch(button, "click");
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn test_stop_propagation_and_listener_removal() {
        let dom = Dom::new();
        let (outer, inner) = {
            let mut doc = dom.borrow_mut();
            let outer = doc.create_element("div");
            let inner = doc.create_element("span");
            doc.append_child(outer, inner);
            (outer, inner)
        };
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        dom.borrow_mut()
            .add_event_listener(outer, "click", Rc::new(move |_e: &mut Event| h.set(h.get() + 1)));
        let id = dom
            .borrow_mut()
            .add_event_listener(inner, "click", Rc::new(|e: &mut Event| e.stop_propagation()))
            .unwrap();

        dom.dispatch(inner, "click");
        assert_eq!(hits.get(), 0);

        assert!(dom.borrow_mut().remove_event_listener(inner, id));
        dom.dispatch(inner, "click");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_listener_may_mutate_document() {
        let dom = Dom::new();
        let button = dom.borrow_mut().create_element("button");
        let handle = dom.clone();
        dom.borrow_mut().add_event_listener(
            button,
            "click",
            Rc::new(move |e: &mut Event| {
                handle.borrow_mut().set_attribute(e.target, "clicked", "yes");
            }),
        );
        dom.dispatch(button, "click");
        assert_eq!(dom.borrow().get_attribute(button, "clicked").as_deref(), Some("yes"));
    }

    #[test]
    fn test_release_frees_subtree_and_listeners() {
        let mut doc = Document::new();
        let host = doc.create_element("x-card");
        let shadow = doc.attach_shadow(host).unwrap();
        doc.set_inner_html(shadow, "<p><b>hi</b></p>");
        let p = doc.children(shadow)[0];
        let captured = Rc::new(Cell::new(0));
        let c = captured.clone();
        doc.add_event_listener(p, "click", Rc::new(move |_e: &mut Event| c.set(c.get() + 1)));
        assert_eq!(Rc::strong_count(&captured), 2);

        let live = doc.live_count();
        // host, shadow root, p, b, text
        assert_eq!(doc.release(host), 5);
        assert_eq!(doc.live_count(), live - 5);
        assert_eq!(Rc::strong_count(&captured), 1);
        assert!(!doc.is_live(shadow));

        let slots = doc.len();
        let reused = doc.create_element("div");
        assert!(reused.0 < slots);
        assert_eq!(doc.len(), slots);
        assert!(doc.children(reused).is_empty());
    }

    #[test]
    fn test_release_ignores_attached_nodes() {
        let mut doc = Document::new();
        let body = doc.body();
        let el = doc.create_element("div");
        doc.append_child(body, el);
        assert_eq!(doc.release(el), 0);
        assert_eq!(doc.release(body), 0);
        assert!(doc.is_live(el));
    }

    #[test]
    fn test_repeated_inner_html_stays_bounded() {
        let mut doc = Document::new();
        let root = doc.create_element("div");
        doc.set_inner_html(root, "<p>0</p>");
        let slots = doc.len();
        for i in 1..200 {
            doc.set_inner_html(root, &format!("<p>{}</p>", i));
        }
        assert_eq!(doc.len(), slots);
        assert_eq!(doc.inner_html(root), "<p>199</p>");
    }

    #[test]
    fn test_dispatch_skips_nodes_released_by_a_listener() {
        let dom = Dom::new();
        let (root, button) = {
            let mut doc = dom.borrow_mut();
            let root = doc.create_element("div");
            doc.set_inner_html(root, "<span><button>go</button></span>");
            let button = doc.query_selector(root, "button").unwrap();
            (root, button)
        };
        let old_span = dom.borrow().parent(button).unwrap();
        let hits = Rc::new(Cell::new(0));

        let d = dom.clone();
        let h = hits.clone();
        dom.borrow_mut().add_event_listener(
            button,
            "click",
            Rc::new(move |_e: &mut Event| {
                let mut doc = d.borrow_mut();
                doc.set_inner_html(root, "<span><button>again</button></span>");
                // whatever now occupies the old span's slot is not on this
                // event's path
                let h = h.clone();
                doc.add_event_listener(old_span, "click", Rc::new(move |_e: &mut Event| h.set(h.get() + 1)));
            }),
        );
        dom.dispatch(button, "click");

        assert_eq!(hits.get(), 0);
        assert_eq!(dom.borrow().inner_html(root), "<span><button>again</button></span>");
    }
}
