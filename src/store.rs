//! Named stores
//!
//! A [`NamedStore`] is the only state shared between component instances. All
//! mutation goes through [`NamedStore::set`] or the merge setters so property
//! hooks and subscriber notification can never be bypassed.
//!
//! Subscribers are held weakly; a store never keeps a component alive.

use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::eval::strict_equals;

/// Re-render entry point of anything that can subscribe to a store.
pub trait Subscriber {
    fn notify(&self, store: &str);
}

/// When a write notifies subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Only writes that change a value notify.
    #[default]
    OnChange,
    /// Every write notifies, changed or not.
    Always,
}

pub type HookId = u64;
pub type InstanceId = u64;

/// `(new_value, old_value, property)`
pub type HookFn = Rc<dyn Fn(&Value, &Value, &str)>;

/// Store-bound action: receives the store and the call arguments.
pub type StoreAction = Rc<dyn Fn(&NamedStore, &[Value]) -> Value>;

struct HookEntry {
    id: HookId,
    property: String,
    owner: Option<InstanceId>,
    callback: HookFn,
}

pub struct NamedStore {
    name: String,
    policy: NotifyPolicy,
    state: RefCell<Map<String, Value>>,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
    hooks: RefCell<Vec<HookEntry>>,
    actions: RefCell<BTreeMap<String, StoreAction>>,
    next_hook: Cell<HookId>,
}

impl std::fmt::Debug for NamedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedStore")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("state", &self.state.borrow())
            .field("subscribers", &self.subscriber_count())
            .field("hooks", &self.hooks.borrow().len())
            .finish()
    }
}

fn same_subscriber(a: &Weak<dyn Subscriber>, b: &Weak<dyn Subscriber>) -> bool {
    std::ptr::eq(a.as_ptr() as *const (), b.as_ptr() as *const ())
}

impl NamedStore {
    pub fn new(name: &str, initial: Map<String, Value>, policy: NotifyPolicy) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            policy,
            state: RefCell::new(initial),
            subscribers: RefCell::new(Vec::new()),
            hooks: RefCell::new(Vec::new()),
            actions: RefCell::new(BTreeMap::new()),
            next_hook: Cell::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> NotifyPolicy {
        self.policy
    }

    pub fn get(&self, property: &str) -> Option<Value> {
        self.state.borrow().get(property).cloned()
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.state.borrow().clone())
    }

    /// Fill in keys the store does not have yet; existing values win and
    /// nobody is notified.
    pub fn merge_defaults(&self, defaults: Map<String, Value>) {
        let mut state = self.state.borrow_mut();
        for (key, value) in defaults {
            state.entry(key).or_insert(value);
        }
    }

    // ─── writes ──────────────────────────────────────────────────────────────

    /// Write one property. Returns whether subscribers were notified.
    pub fn set(&self, property: &str, value: Value) -> bool {
        let old = self.get(property).unwrap_or(Value::Null);
        let changed = !strict_equals(&old, &value);
        if !changed && self.policy == NotifyPolicy::OnChange {
            tracing::debug!(store = %self.name, property, "write skipped; value unchanged");
            return false;
        }

        self.state.borrow_mut().insert(property.to_string(), value.clone());
        if changed {
            self.run_hooks(property, &value, &old);
        }
        self.notify_all();
        true
    }

    /// `setState`-style merge of a partial object.
    pub fn merge(&self, partial: Map<String, Value>) -> bool {
        let mut changes = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for (key, value) in partial {
                let old = state.get(&key).cloned().unwrap_or(Value::Null);
                if !strict_equals(&old, &value) {
                    changes.push((key.clone(), value.clone(), old));
                }
                state.insert(key, value);
            }
        }

        for (key, new, old) in &changes {
            self.run_hooks(key, new, old);
        }

        if changes.is_empty() && self.policy == NotifyPolicy::OnChange {
            return false;
        }
        self.notify_all();
        true
    }

    /// Merge whatever `updater` produces from the current state.
    pub fn update_with(&self, updater: impl FnOnce(&Value) -> Value) -> bool {
        match updater(&self.snapshot()) {
            Value::Object(partial) => self.merge(partial),
            other => {
                tracing::warn!(
                    store = %self.name,
                    result = %other,
                    "store updater must return an object; update ignored"
                );
                false
            }
        }
    }

    // ─── subscribers ─────────────────────────────────────────────────────────

    /// Idempotent. Returns true when the subscriber was newly added.
    pub fn subscribe(&self, subscriber: Weak<dyn Subscriber>) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        subs.retain(|s| s.strong_count() > 0);
        if subs.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    pub fn unsubscribe(&self, subscriber: &Weak<dyn Subscriber>) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.strong_count() > 0 && !same_subscriber(s, subscriber));
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    /// Notify every live subscriber once, in registration order.
    pub fn notify_all(&self) {
        let live: Vec<Rc<dyn Subscriber>> = {
            let mut subs = self.subscribers.borrow_mut();
            subs.retain(|s| s.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        tracing::debug!(store = %self.name, subscribers = live.len(), "notifying subscribers");
        for subscriber in live {
            subscriber.notify(&self.name);
        }
    }

    // ─── hooks ───────────────────────────────────────────────────────────────

    pub fn add_hook(&self, property: &str, owner: Option<InstanceId>, callback: HookFn) -> HookId {
        let id = self.next_hook.get();
        self.next_hook.set(id + 1);
        self.hooks.borrow_mut().push(HookEntry {
            id,
            property: property.to_string(),
            owner,
            callback,
        });
        id
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        hooks.len() != before
    }

    /// Drop every hook attributed to `owner`; returns how many were removed.
    pub fn remove_hooks_owned_by(&self, owner: InstanceId) -> usize {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|h| h.owner != Some(owner));
        before - hooks.len()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    pub fn hooked_properties(&self) -> Vec<String> {
        let mut props: Vec<String> = Vec::new();
        for hook in self.hooks.borrow().iter() {
            if !props.contains(&hook.property) {
                props.push(hook.property.clone());
            }
        }
        props
    }

    fn run_hooks(&self, property: &str, new: &Value, old: &Value) {
        let callbacks: Vec<HookFn> = self
            .hooks
            .borrow()
            .iter()
            .filter(|h| h.property == property)
            .map(|h| h.callback.clone())
            .collect();

        for callback in callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(new, old, property)));
            if result.is_err() {
                tracing::warn!(store = %self.name, property, "state hook panicked; continuing");
            }
        }
    }

    // ─── actions ─────────────────────────────────────────────────────────────

    pub fn add_action(&self, name: &str, action: StoreAction) {
        self.actions.borrow_mut().insert(name.to_string(), action);
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.borrow().is_empty()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.borrow().keys().cloned().collect()
    }

    pub fn call_action(&self, name: &str, args: &[Value]) -> Option<Value> {
        let action = self.actions.borrow().get(name).cloned()?;
        Some(action(self, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter {
        hits: Cell<usize>,
    }

    impl Subscriber for Counter {
        fn notify(&self, _store: &str) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn counter() -> Rc<Counter> {
        Rc::new(Counter { hits: Cell::new(0) })
    }

    fn weak(c: &Rc<Counter>) -> Weak<dyn Subscriber> {
        let rc: Rc<dyn Subscriber> = c.clone();
        Rc::downgrade(&rc)
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_set_notifies_only_on_change() {
        let store = NamedStore::new("counter", obj(json!({ "count": 0 })), NotifyPolicy::OnChange);
        let sub = counter();
        store.subscribe(weak(&sub));

        assert!(store.set("count", json!(1)));
        assert!(!store.set("count", json!(1)));
        assert!(!store.set("count", json!(1.0)));
        assert_eq!(sub.hits.get(), 1);
    }

    #[test]
    fn test_always_policy_notifies_every_merge() {
        let store = NamedStore::new("prefs", obj(json!({ "dark": false })), NotifyPolicy::Always);
        let sub = counter();
        store.subscribe(weak(&sub));

        store.merge(obj(json!({ "dark": false })));
        store.update_with(|s| json!({ "dark": !s["dark"].as_bool().unwrap_or(false) }));
        assert_eq!(sub.hits.get(), 2);
        assert_eq!(store.get("dark"), Some(json!(true)));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let store = NamedStore::new("s", Map::new(), NotifyPolicy::OnChange);
        let sub = counter();
        assert!(store.subscribe(weak(&sub)));
        assert!(!store.subscribe(weak(&sub)));
        assert_eq!(store.subscriber_count(), 1);
        assert!(store.unsubscribe(&weak(&sub)));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_store_does_not_keep_subscriber_alive() {
        let store = NamedStore::new("s", Map::new(), NotifyPolicy::OnChange);
        let sub = counter();
        store.subscribe(weak(&sub));
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
        store.set("x", json!(1));
    }

    #[test]
    fn test_hooks_receive_new_old_and_property() {
        let store = NamedStore::new("user", obj(json!({ "name": "a" })), NotifyPolicy::OnChange);
        let seen: Rc<RefCell<Vec<(Value, Value, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        store.add_hook(
            "name",
            None,
            Rc::new(move |new: &Value, old: &Value, prop: &str| {
                log.borrow_mut().push((new.clone(), old.clone(), prop.to_string()))
            }),
        );

        store.set("name", json!("b"));
        store.set("name", json!("b"));
        store.set("other", json!(1));
        assert_eq!(*seen.borrow(), vec![(json!("b"), json!("a"), "name".to_string())]);
    }

    #[test]
    fn test_owned_hooks_are_removed_together() {
        let store = NamedStore::new("s", Map::new(), NotifyPolicy::OnChange);
        let noop: HookFn = Rc::new(|_: &Value, _: &Value, _: &str| {});
        store.add_hook("a", Some(7), noop.clone());
        store.add_hook("b", Some(7), noop.clone());
        let global = store.add_hook("a", None, noop);
        assert_eq!(store.remove_hooks_owned_by(7), 2);
        assert_eq!(store.hook_count(), 1);
        assert!(store.remove_hook(global));
        assert_eq!(store.hook_count(), 0);
    }

    #[test]
    fn test_panicking_hook_does_not_abort_write() {
        let store = NamedStore::new("s", Map::new(), NotifyPolicy::OnChange);
        store.add_hook("x", None, Rc::new(|_: &Value, _: &Value, _: &str| panic!("boom")));
        let sub = counter();
        store.subscribe(weak(&sub));
        assert!(store.set("x", json!(1)));
        assert_eq!(sub.hits.get(), 1);
    }

    #[test]
    fn test_merge_defaults_keeps_existing_values() {
        let store = NamedStore::new("s", obj(json!({ "count": 5 })), NotifyPolicy::OnChange);
        store.merge_defaults(obj(json!({ "count": 0, "step": 1 })));
        assert_eq!(store.snapshot(), json!({ "count": 5, "step": 1 }));
    }

    #[test]
    fn test_store_actions() {
        let store = NamedStore::new("counter", obj(json!({ "count": 1 })), NotifyPolicy::OnChange);
        store.add_action(
            "add",
            Rc::new(|s: &NamedStore, args: &[Value]| {
                let by = args.first().and_then(Value::as_i64).unwrap_or(1);
                let next = s.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + by;
                s.set("count", json!(next));
                json!(next)
            }),
        );
        assert_eq!(store.call_action("add", &[json!(4)]), Some(json!(5)));
        assert_eq!(store.call_action("missing", &[]), None);
        assert_eq!(store.action_names(), vec!["add"]);
    }
}
