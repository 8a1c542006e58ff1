//! Event binding
//!
//! After each render the binder walks the content root for `on<event>`
//! attributes from a fixed catalogue, resolves the named handler through an
//! ordered [`ResolverChain`], attaches a listener and removes the attribute so
//! the next pass does not bind it twice.

use serde_json::Value;
use std::rc::{Rc, Weak};

use crate::document::{Dom, Event, NodeId};
use crate::eval::{evaluate, parse_expression, EvalResult, EvalScope, Expr, ValueScope};

/// Supported event attributes, by family. Anything else is never auto-bound.
pub const EVENT_CATALOGUE: &[(&str, &[&str])] = &[
    (
        "mouse",
        &[
            "click",
            "dblclick",
            "mousedown",
            "mouseup",
            "mouseover",
            "mouseout",
            "mousemove",
            "mouseenter",
            "mouseleave",
            "contextmenu",
            "wheel",
        ],
    ),
    (
        "form",
        &["submit", "reset", "change", "input", "focus", "blur", "select", "invalid"],
    ),
    ("keyboard", &["keydown", "keyup", "keypress"]),
    ("touch", &["touchstart", "touchend", "touchmove", "touchcancel"]),
    (
        "drag",
        &["dragstart", "drag", "dragend", "dragenter", "dragleave", "dragover", "drop"],
    ),
    (
        "media",
        &["play", "pause", "ended", "volumechange", "timeupdate", "loadeddata", "canplay"],
    ),
    ("window", &["load", "error", "resize", "scroll"]),
    (
        "misc",
        &["toggle", "animationend", "transitionend", "copy", "cut", "paste"],
    ),
];

pub fn is_catalogued(event: &str) -> bool {
    EVENT_CATALOGUE
        .iter()
        .any(|(_, events)| events.contains(&event))
}

/// Event name for an `on<event>` attribute in the catalogue.
pub fn event_for_attribute(attr: &str) -> Option<&str> {
    let event = attr.strip_prefix("on")?;
    is_catalogued(event).then_some(event)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLER REFERENCES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    /// `this.name(...)`
    Method,
    /// `name` or `name(...)`
    Named,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRef {
    pub kind: HandlerKind,
    pub name: String,
    /// Argument expressions; empty means the event is passed alone.
    pub args: Vec<Expr>,
}

/// Parse an event attribute value into a handler reference.
pub fn parse_handler(source: &str) -> Option<HandlerRef> {
    let source = source.trim().trim_end_matches(';').trim();
    match parse_expression(source).ok()? {
        Expr::Ident(name) => Some(HandlerRef {
            kind: HandlerKind::Named,
            name,
            args: Vec::new(),
        }),
        Expr::Member {
            object, property, ..
        } if *object == Expr::This => Some(HandlerRef {
            kind: HandlerKind::Method,
            name: property,
            args: Vec::new(),
        }),
        Expr::Call(callee, args) => match *callee {
            Expr::Ident(name) => Some(HandlerRef {
                kind: HandlerKind::Named,
                name,
                args,
            }),
            Expr::Member {
                object, property, ..
            } if *object == Expr::This => Some(HandlerRef {
                kind: HandlerKind::Method,
                name: property,
                args,
            }),
            _ => None,
        },
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives the dispatched event and the evaluated arguments.
pub type EventHandler = Rc<dyn Fn(&mut Event, Vec<Value>)>;

type ResolveFn = Box<dyn Fn(&HandlerRef) -> Option<EventHandler>>;

struct Resolver {
    name: &'static str,
    resolve: ResolveFn,
}

/// Handler lookups tried in order; the first match wins.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Resolver>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: &'static str,
        resolve: impl Fn(&HandlerRef) -> Option<EventHandler> + 'static,
    ) -> Self {
        self.resolvers.push(Resolver {
            name,
            resolve: Box::new(resolve),
        });
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name).collect()
    }

    /// The matching handler and the name of the resolver that supplied it.
    pub fn resolve(&self, handler: &HandlerRef) -> Option<(&'static str, EventHandler)> {
        self.resolvers
            .iter()
            .find_map(|r| (r.resolve)(handler).map(|h| (r.name, h)))
    }
}

/// A scope that adds `event` on top of another scope.
struct EventScope<'a> {
    inner: &'a dyn EvalScope,
    event: Value,
}

impl EvalScope for EventScope<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        self.inner.field(name)
    }

    fn set_field(&self, name: &str, value: Value) -> EvalResult<()> {
        self.inner.set_field(name, value)
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.inner.call_method(name, args)
    }

    fn identifier(&self, name: &str) -> Option<Value> {
        if name == "event" {
            return Some(self.event.clone());
        }
        self.inner.identifier(name)
    }

    fn has_store(&self, name: &str) -> bool {
        self.inner.has_store(name)
    }

    fn read_store(&self, store: &str, prop: &str) -> EvalResult<Value> {
        self.inner.read_store(store, prop)
    }

    fn store_snapshot(&self, store: &str) -> EvalResult<Value> {
        self.inner.store_snapshot(store)
    }

    fn write_store(&self, store: &str, prop: &str, value: Value) -> EvalResult<()> {
        self.inner.write_store(store, prop, value)
    }

    fn has_actions(&self, group: &str) -> bool {
        self.inner.has_actions(group)
    }

    fn call_action(&self, group: &str, action: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.inner.call_action(group, action, args)
    }
}

fn handler_args(
    args: &[Expr],
    event: &Event,
    scope: Option<&Weak<dyn EvalScope>>,
) -> EvalResult<Vec<Value>> {
    let event_value = event.to_value();
    if args.is_empty() {
        return Ok(vec![event_value]);
    }
    let fallback = ValueScope::default();
    let owner = scope.and_then(Weak::upgrade);
    let inner: &dyn EvalScope = match &owner {
        Some(rc) => rc.as_ref(),
        None => &fallback,
    };
    let event_scope = EventScope {
        inner,
        event: event_value,
    };
    args.iter().map(|a| evaluate(a, &event_scope)).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindReport {
    pub bound: usize,
    /// Handler sources that could not be resolved; their attributes stay.
    pub unresolved: Vec<String>,
}

/// Bind every catalogued event attribute under `root`. Arguments are
/// evaluated against `arg_scope` (with `event` bound) at dispatch time.
pub fn bind_events(
    dom: &Dom,
    root: NodeId,
    chain: &ResolverChain,
    arg_scope: Option<Weak<dyn EvalScope>>,
) -> BindReport {
    let mut report = BindReport::default();

    let candidates: Vec<(NodeId, String, String)> = {
        let doc = dom.borrow();
        doc.descendants(root)
            .into_iter()
            .flat_map(|node| {
                doc.attributes(node)
                    .into_iter()
                    .filter(|(name, _)| event_for_attribute(name).is_some())
                    .map(move |(name, value)| (node, name, value))
            })
            .collect()
    };

    for (node, attr, source) in candidates {
        let event = attr[2..].to_string();
        let Some(handler_ref) = parse_handler(&source) else {
            tracing::warn!(handler = %source, event = %event, "unparseable event handler; left unbound");
            report.unresolved.push(source);
            continue;
        };

        let Some((resolver, handler)) = chain.resolve(&handler_ref) else {
            tracing::warn!(handler = %handler_ref.name, event = %event, "event handler not found; left unbound");
            report.unresolved.push(source);
            continue;
        };

        let args = handler_ref.args.clone();
        let scope = arg_scope.clone();
        let name = handler_ref.name.clone();
        let is_submit = event == "submit";
        let listener = Rc::new(move |e: &mut Event| {
            if is_submit {
                e.prevent_default();
            }
            match handler_args(&args, e, scope.as_ref()) {
                Ok(values) => handler(e, values),
                Err(err) => {
                    tracing::error!(handler = %name, error = %err, "failed to evaluate handler arguments")
                }
            }
        });

        let mut doc = dom.borrow_mut();
        doc.add_event_listener(node, &event, listener);
        doc.remove_attribute(node, &attr);
        report.bound += 1;
        tracing::debug!(handler = %handler_ref.name, event = %event, resolver, "bound event handler");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[test]
    fn test_catalogue() {
        assert!(is_catalogued("click"));
        assert!(is_catalogued("touchstart"));
        assert!(is_catalogued("drop"));
        assert!(!is_catalogued("hover"));
        assert_eq!(event_for_attribute("onsubmit"), Some("submit"));
        assert_eq!(event_for_attribute("onhover"), None);
        assert_eq!(event_for_attribute("class"), None);
    }

    #[test]
    fn test_parse_handler_forms() {
        let h = parse_handler("this.increment()").unwrap();
        assert_eq!(h.kind, HandlerKind::Method);
        assert_eq!(h.name, "increment");
        assert!(h.args.is_empty());

        let h = parse_handler("this.remove(3, event)").unwrap();
        assert_eq!(h.args.len(), 2);

        let h = parse_handler("handleClick").unwrap();
        assert_eq!(h.kind, HandlerKind::Named);
        assert_eq!(h.name, "handleClick");

        let h = parse_handler("this.save;").unwrap();
        assert_eq!(h.kind, HandlerKind::Method);

        assert!(parse_handler("alert('x') + 1").is_none());
        assert!(parse_handler("a.b()").is_none());
    }

    fn recording_handler(log: &Rc<RefCell<Vec<String>>>, label: &str) -> EventHandler {
        let log = log.clone();
        let label = label.to_string();
        Rc::new(move |e: &mut Event, args: Vec<Value>| {
            log.borrow_mut()
                .push(format!("{}:{}:{}", label, e.event_type, Value::Array(args)))
        })
    }

    #[test]
    fn test_resolver_chain_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let methods = recording_handler(&log, "method");
        let local = recording_handler(&log, "local");
        let chain = ResolverChain::new()
            .with("instance", move |h: &HandlerRef| (h.name == "save").then(|| methods.clone()))
            .with("local", move |h: &HandlerRef| {
                (h.kind == HandlerKind::Named).then(|| local.clone())
            });

        assert_eq!(chain.names(), vec!["instance", "local"]);
        let save = parse_handler("save").unwrap();
        assert_eq!(chain.resolve(&save).map(|(n, _)| n), Some("instance"));
        let other = parse_handler("other").unwrap();
        assert_eq!(chain.resolve(&other).map(|(n, _)| n), Some("local"));
        let missing = parse_handler("this.nothing()").unwrap();
        assert!(chain.resolve(&missing).is_none());
    }

    fn fixture(html: &str) -> (Dom, NodeId) {
        let dom = Dom::new();
        let root = {
            let mut doc = dom.borrow_mut();
            let root = doc.create_element("div");
            doc.set_inner_html(root, html);
            root
        };
        (dom, root)
    }

    #[test]
    fn test_bind_events_removes_attributes_and_dispatches() {
        let (dom, root) = fixture(
            "<button id=\"a\" onclick=\"go\">A</button><form id=\"f\" onsubmit=\"send\"></form><p onhover=\"go\"></p>",
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut handlers: HashMap<String, EventHandler> = HashMap::new();
        handlers.insert("go".to_string(), recording_handler(&log, "go"));
        handlers.insert("send".to_string(), recording_handler(&log, "send"));
        let chain = ResolverChain::new().with("local", move |h: &HandlerRef| handlers.get(&h.name).cloned());

        let report = bind_events(&dom, root, &chain, None);
        assert_eq!(report.bound, 2);
        assert!(report.unresolved.is_empty());

        let (button, form, p) = {
            let doc = dom.borrow();
            (
                doc.query_selector(root, "#a").unwrap(),
                doc.query_selector(root, "#f").unwrap(),
                doc.query_selector(root, "p").unwrap(),
            )
        };
        assert!(!dom.borrow().has_attribute(button, "onclick"));
        assert!(dom.borrow().has_attribute(p, "onhover"));

        dom.dispatch(button, "click");
        let submitted = dom.dispatch(form, "submit");
        assert!(submitted.default_prevented());
        assert_eq!(log.borrow().len(), 2);
        assert!(log.borrow()[0].starts_with("go:click:[{"));

        // a second pass binds nothing new
        assert_eq!(bind_events(&dom, root, &chain, None).bound, 0);
    }

    #[test]
    fn test_unresolved_handler_is_left_in_place() {
        let (dom, root) = fixture("<button onclick=\"missing\">x</button>");
        let report = bind_events(&dom, root, &ResolverChain::new(), None);
        assert_eq!(report.bound, 0);
        assert_eq!(report.unresolved, vec!["missing".to_string()]);
        let button = dom.borrow().query_selector(root, "button").unwrap();
        assert!(dom.borrow().has_attribute(button, "onclick"));
    }

    #[test]
    fn test_handler_arguments_see_scope_and_event() {
        let (dom, root) = fixture("<button onclick=\"pick(this.id, event.type, 2)\">x</button>");
        let log = Rc::new(RefCell::new(Vec::new()));
        let pick = recording_handler(&log, "pick");
        let chain = ResolverChain::new().with("local", move |_h: &HandlerRef| Some(pick.clone()));

        let scope: Rc<dyn EvalScope> = Rc::new(ValueScope {
            this: json!({ "id": 7 }).as_object().cloned().unwrap_or_default(),
            identifiers: Default::default(),
        });
        bind_events(&dom, root, &chain, Some(Rc::downgrade(&scope)));
        let button = dom.borrow().query_selector(root, "button").unwrap();
        dom.dispatch(button, "click");
        assert_eq!(*log.borrow(), vec!["pick:click:[7,\"click\",2]".to_string()]);
    }
}
