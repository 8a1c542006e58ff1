//! Parse Module for Glint Components
//!
//! Turns raw component source into a [`ComponentRecord`]. Two dialects exist:
//! markup files (`.glint`) with `<template>`, `<script>` and `<style>`
//! segments, and function files (`.glint.js`) whose single function returns
//! markup text.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{local_name, namespace_url, ns, parse_fragment, QualName};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use crate::lexer::{expression_extent, line_col, mask_literals};
use crate::validate::{CompilerError, GLINT_E_PARSE};

/// Appended to every PascalCase component name.
pub const COMPONENT_SUFFIX: &str = "Component";
/// Prefix for derived tags that would otherwise lack a hyphen.
pub const TAG_NAMESPACE: &str = "glint";

lazy_static! {
    static ref TEMPLATE_OPEN_RE: Regex = Regex::new(r"(?i)<template(?:\s[^>]*)?>").unwrap();
    static ref TEMPLATE_CLOSE_RE: Regex = Regex::new(r"(?i)</template\s*>").unwrap();
    static ref SCRIPT_RE: Regex = Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").unwrap();
    static ref STYLE_RE: Regex = Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").unwrap();
    static ref CUSTOM_TAG_RE: Regex = Regex::new(r"<[a-zA-Z][a-zA-Z0-9]*-").unwrap();
    static ref REACTIVE_ASSIGN_RE: Regex =
        Regex::new(r"\b(?:this|self)\s*\.\s*([A-Za-z_$][\w$]*)\s*=(?:[^=]|$)").unwrap();
    static ref EXPORT_LET_RE: Regex = Regex::new(r"\bexport\s+let\s+([A-Za-z_$][\w$]*)").unwrap();
    static ref FUNCTION_DECL_RE: Regex =
        Regex::new(r"\bfunction\s+([A-Za-z_$][\w$]*)\s*\(").unwrap();
    static ref PROPS_READ_RE: Regex = Regex::new(r"\bprops\s*\.\s*([A-Za-z_$][\w$]*)").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT RECORD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dialect {
    Markup,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub name: String,
    pub tag_name: String,
    pub dialect: Dialect,
    pub file_path: String,
    pub template: String,
    pub script: String,
    pub style: String,
    /// Distinct `this.x =` targets in first-seen order
    pub reactive_vars: Vec<String>,
    /// Declared props in declaration order
    pub props: Vec<String>,
    /// Default value source text, unevaluated
    pub prop_defaults: BTreeMap<String, String>,
    /// Function dialect only
    pub entry_point: Option<String>,
}

impl ComponentRecord {
    /// Prop defaults in declaration order.
    pub fn ordered_defaults(&self) -> impl Iterator<Item = (&str, &str)> {
        self.props.iter().filter_map(|p| {
            self.prop_defaults
                .get(p)
                .map(|d| (p.as_str(), d.as_str()))
        })
    }
}

/// Raw segment text of a markup component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segments {
    pub template: String,
    pub script: String,
    pub style: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a component file, picking the dialect from its extension. Files with
/// neither extension are sniffed for markup segments.
pub fn parse_component(source: &str, file_path: &str) -> Result<ComponentRecord, CompilerError> {
    let dialect = detect_dialect(source, file_path);
    tracing::debug!(file = file_path, ?dialect, "parsing component");
    match dialect {
        Dialect::Markup => parse_markup_component(source, file_path),
        Dialect::Function => Ok(parse_function_component(source, file_path)),
    }
}

pub fn detect_dialect(source: &str, file_path: &str) -> Dialect {
    if file_path.ends_with(".glint.js") {
        Dialect::Function
    } else if file_path.ends_with(".glint") {
        Dialect::Markup
    } else if TEMPLATE_OPEN_RE.is_match(source) || SCRIPT_RE.is_match(source) {
        Dialect::Markup
    } else {
        Dialect::Function
    }
}

pub fn parse_markup_component(
    source: &str,
    file_path: &str,
) -> Result<ComponentRecord, CompilerError> {
    let segments = extract_segments(source, file_path)?;
    let template = wrap_custom_elements(&segments.template);
    let (props, prop_defaults) = extract_props(&segments.script);
    let reactive_vars = extract_reactive_vars(&segments.script);
    let name = component_name(file_path);

    Ok(ComponentRecord {
        tag_name: tag_name(&name),
        name,
        dialect: Dialect::Markup,
        file_path: file_path.to_string(),
        template,
        script: segments.script,
        style: segments.style,
        reactive_vars,
        props,
        prop_defaults,
        entry_point: None,
    })
}

/// The whole file is script; the template is whatever the function returns at
/// runtime. Observed props are the `props.x` reads.
pub fn parse_function_component(source: &str, file_path: &str) -> ComponentRecord {
    let name = component_name(file_path);
    let entry = infer_entry_point(source).unwrap_or_else(|| name.clone());

    let mut props: Vec<String> = Vec::new();
    for caps in PROPS_READ_RE.captures_iter(source) {
        let prop = caps[1].to_string();
        if !props.contains(&prop) {
            props.push(prop);
        }
    }

    ComponentRecord {
        tag_name: tag_name(&name),
        name,
        dialect: Dialect::Function,
        file_path: file_path.to_string(),
        template: String::new(),
        script: source.to_string(),
        style: String::new(),
        reactive_vars: Vec::new(),
        props,
        prop_defaults: BTreeMap::new(),
        entry_point: Some(entry),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEGMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Extract the first top-level `<template>` (nested templates included), then
/// the first `<script>` and `<style>` outside it. Missing segments are empty.
pub fn extract_segments(source: &str, file_path: &str) -> Result<Segments, CompilerError> {
    let mut segments = Segments::default();
    let mut remainder = source.to_string();

    if let Some(open) = TEMPLATE_OPEN_RE.find(source) {
        let content_start = open.end();
        let mut depth = 1;
        let mut cursor = content_start;
        let mut close_range = None;

        while depth > 0 {
            let next_open = TEMPLATE_OPEN_RE.find_at(source, cursor);
            let Some(next_close) = TEMPLATE_CLOSE_RE.find_at(source, cursor) else {
                break;
            };
            match next_open {
                Some(o) if o.start() < next_close.start() => {
                    depth += 1;
                    cursor = o.end();
                }
                _ => {
                    depth -= 1;
                    cursor = next_close.end();
                    if depth == 0 {
                        close_range = Some((next_close.start(), next_close.end()));
                    }
                }
            }
        }

        let Some((close_start, close_end)) = close_range else {
            let (line, column) = line_col(source, open.start());
            return Err(CompilerError::with_details(
                GLINT_E_PARSE,
                "Unterminated <template> segment",
                file_path,
                line,
                column,
                Some(open.as_str().to_string()),
                vec!["Close the template segment with </template>.".to_string()],
            ));
        };

        segments.template = source[content_start..close_start].trim().to_string();
        remainder = format!("{}{}", &source[..open.start()], &source[close_end..]);
    }

    if let Some(caps) = SCRIPT_RE.captures(&remainder) {
        segments.script = caps[1].trim().to_string();
    }
    if let Some(caps) = STYLE_RE.captures(&remainder) {
        segments.style = caps[1].trim().to_string();
    }

    Ok(segments)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CUSTOM ELEMENT WRAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Wrap every hyphenated element in a `<div>` unless it already is the only
/// element child of a div. The template root counts as a div, so a lone
/// top-level custom element stays as is. Idempotent.
pub fn wrap_custom_elements(template: &str) -> String {
    if template.trim().is_empty() || !CUSTOM_TAG_RE.is_match(template) {
        return template.to_string();
    }

    let dom = parse_fragment(
        RcDom::default(),
        Default::default(),
        QualName::new(None, ns!(html), local_name!("div")),
        vec![],
    )
    .one(template);

    let Some(root) = dom.document.children.borrow().first().cloned() else {
        return template.to_string();
    };

    let changed = wrap_children(&root, true);
    if !changed {
        return template.to_string();
    }

    match serialize_children(&root) {
        Some(html) => html,
        None => {
            tracing::warn!("failed to serialize wrapped template; keeping original");
            template.to_string()
        }
    }
}

fn element_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

fn element_child_count(handle: &Handle) -> usize {
    handle
        .children
        .borrow()
        .iter()
        .filter(|c| matches!(c.data, NodeData::Element { .. }))
        .count()
}

/// Returns true when anything was wrapped.
fn wrap_children(parent: &Handle, parent_is_div: bool) -> bool {
    let mut changed = false;
    let snapshot: Vec<Handle> = parent.children.borrow().clone();

    for child in snapshot {
        let Some(tag) = element_name(&child) else {
            continue;
        };
        changed |= wrap_children(&child, tag == "div");

        if !tag.contains('-') {
            continue;
        }
        let sole_child_of_div = parent_is_div && element_child_count(parent) == 1;
        if sole_child_of_div {
            continue;
        }

        let wrapper = Node::new(NodeData::Element {
            name: QualName::new(None, ns!(html), local_name!("div")),
            attrs: RefCell::new(Vec::new()),
            template_contents: RefCell::new(None),
            mathml_annotation_xml_integration_point: false,
        });

        let mut siblings = parent.children.borrow_mut();
        if let Some(index) = siblings.iter().position(|c| Rc::ptr_eq(c, &child)) {
            child.parent.set(Some(Rc::downgrade(&wrapper)));
            wrapper.children.borrow_mut().push(child.clone());
            wrapper.parent.set(Some(Rc::downgrade(parent)));
            siblings[index] = wrapper;
            changed = true;
        }
    }

    changed
}

fn serialize_children(root: &Handle) -> Option<String> {
    let mut out = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
        ..Default::default()
    };
    serialize(&mut out, &SerializableHandle::from(root.clone()), opts).ok()?;
    String::from_utf8(out).ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPT INFERENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Distinct targets of `this.x = ...` / `self.x = ...`, first-seen order.
/// Comparisons (`==`, `===`) and literal content are ignored.
pub fn extract_reactive_vars(script: &str) -> Vec<String> {
    let masked = mask_literals(script);
    let mut vars: Vec<String> = Vec::new();
    for caps in REACTIVE_ASSIGN_RE.captures_iter(&masked) {
        let name = caps[1].to_string();
        if !vars.contains(&name) {
            vars.push(name);
        }
    }
    vars
}

/// `export let name = <expr>` and bare `export let name;` declarations.
pub fn extract_props(script: &str) -> (Vec<String>, BTreeMap<String, String>) {
    let masked = mask_literals(script);
    let mut props = Vec::new();
    let mut defaults = BTreeMap::new();

    for caps in EXPORT_LET_RE.captures_iter(&masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let prop = name.as_str().to_string();
        if props.contains(&prop) {
            continue;
        }

        let rest = &script[whole.end()..];
        let trimmed = rest.trim_start();
        if let Some(after_eq) = trimmed.strip_prefix('=') {
            if !after_eq.starts_with('=') {
                let default = expression_extent(after_eq).trim();
                if !default.is_empty() {
                    defaults.insert(prop.clone(), default.to_string());
                }
            }
        }
        props.push(prop);
    }

    (props, defaults)
}

pub fn infer_entry_point(source: &str) -> Option<String> {
    let masked = mask_literals(source);
    FUNCTION_DECL_RE
        .captures(&masked)
        .map(|caps| caps[1].to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMING
// ═══════════════════════════════════════════════════════════════════════════════

fn file_stem(file_path: &str) -> String {
    let base = Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    for ext in [".glint.js", ".glint", ".js", ".html"] {
        if let Some(stem) = base.strip_suffix(ext) {
            return stem.to_string();
        }
    }
    base
}

/// `todo-list.glint` → `TodoListComponent`
pub fn component_name(file_path: &str) -> String {
    let stem = file_stem(file_path);
    let mut name: String = stem
        .split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars().filter(|c| c.is_ascii_alphanumeric());
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        name = "Anonymous".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("Glint{}", name);
    }
    name + COMPONENT_SUFFIX
}

/// `TodoListComponent` → `todo-list`; `CounterComponent` → `glint-counter`
pub fn tag_name(component_name: &str) -> String {
    let base = component_name
        .strip_suffix(COMPONENT_SUFFIX)
        .unwrap_or(component_name);

    let mut tag = String::with_capacity(base.len() + 4);
    for (i, c) in base.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                tag.push('-');
            }
            tag.push(c.to_ascii_lowercase());
        } else {
            tag.push(c);
        }
    }

    if !tag.contains('-') {
        tag = format!("{}-{}", TAG_NAMESPACE, tag);
    }
    tag
}

/// `data-user-id` → `dataUserId`
pub fn kebab_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
