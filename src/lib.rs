//! # Glint Compiler
//!
//! Compiles single-file web components into self-registering custom-element
//! classes, and hosts the reactive runtime those classes target.
//!
//! ## Compile half
//!
//! 1. **Parse** (`parse`): markup components (`*.glint`, template/script/style
//!    segments) and function components (`*.glint.js`) become a
//!    [`ComponentRecord`]. Nested custom elements are wrapped for slot
//!    distribution; props and reactive variables are recovered from the script.
//! 2. **Validate** (`validate`): component scripts may not create global state,
//!    actions or hooks; global declaration names are unique across files.
//!    Violations abort the build outside production mode.
//! 3. **Generate** (`codegen`): one class per component plus its
//!    `customElements.define` call, concatenated into a bundle.
//!
//! ## Runtime half
//!
//! [`Runtime`] is an explicit context object owning the named stores, action
//! groups, hooks registry, custom-element registry and the current-component
//! stack. Compiled definitions are instantiated in memory against a
//! [`Dom`] and evaluated by a sandboxed expression interpreter (`eval`).
//! The `element` and `widget` modules provide the declarative element tree
//! with in-place updates.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod cache;
pub mod codegen;
pub mod component;
pub mod config;
pub mod discovery;
pub mod document;
pub mod element;
pub mod error;
pub mod eval;
pub mod events;
pub mod lexer;
pub mod parse;
pub mod runtime;
pub mod store;
pub mod validate;
pub mod widget;


pub use codegen::{generate_bundle, generate_component, ComponentDefinition};
pub use component::{CustomElement, FunctionElement, MarkupElement, RenderContext};
pub use config::{CompileOptions, Mode};
pub use discovery::{build_project, discover_sources, BuildOutput};
pub use document::{Document, Dom, Event, NodeId};
pub use element::{Child, Element, PropValue};
pub use error::GlintError;
pub use parse::{parse_component, ComponentRecord, Dialect};
pub use runtime::{ReactiveState, Runtime, RuntimeError, StoreUpdate};
pub use store::{NamedStore, NotifyPolicy};
pub use validate::{validate_component_script, CompilerError, Severity, ValidationReport};
pub use widget::{run_app, Widget, WidgetRoot, WidgetState};

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BINDING
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn to_napi_error(message: impl std::fmt::Display) -> napi::Error {
    napi::Error::new(napi::Status::GenericFailure, message.to_string())
}

/// Parse one component source; returns the record as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn parse_component_native(source: String, file_path: String) -> napi::Result<String> {
    let record = parse_component(&source, &file_path).map_err(to_napi_error)?;
    serde_json::to_string(&record).map_err(to_napi_error)
}

/// Validate a component script; returns the report as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn validate_script_native(
    script: String,
    file_path: String,
    production: Option<bool>,
) -> napi::Result<String> {
    let mode = if production.unwrap_or(false) {
        Mode::Production
    } else {
        Mode::from_env()
    };
    let report = validate_component_script(&script, &file_path, mode);
    serde_json::to_string(&report).map_err(to_napi_error)
}

/// Generate JavaScript from a record previously returned by
/// `parse_component_native`.
#[cfg(feature = "napi")]
#[napi]
pub fn generate_component_native(record_json: String) -> napi::Result<String> {
    let record: ComponentRecord = serde_json::from_str(&record_json).map_err(to_napi_error)?;
    Ok(generate_component(&record).to_js())
}
