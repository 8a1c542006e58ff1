//! Static Validation
//!
//! Architectural rules checked before code generation:
//! - reserved factories (`createState`, `createActions`, `createHooks`) must not
//!   be called from component scripts
//! - direct writes to the global namespace are discouraged
//! - global declaration names must be unique across every script in the build
//!
//! Fatal diagnostics are downgraded to warnings in production mode.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::Mode;
use crate::lexer::{line_col, mask_literals};

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const GLINT_E_FORBIDDEN_STATE: &str = "GLINT-E-FORBIDDEN-STATE";
pub const GLINT_E_FORBIDDEN_ACTIONS: &str = "GLINT-E-FORBIDDEN-ACTIONS";
pub const GLINT_E_FORBIDDEN_HOOKS: &str = "GLINT-E-FORBIDDEN-HOOKS";
pub const GLINT_W_GLOBAL_WRITE: &str = "GLINT-W-GLOBAL-WRITE";
pub const GLINT_E_DUPLICATE_STATE: &str = "GLINT-E-DUPLICATE-STATE";
pub const GLINT_E_DUPLICATE_ACTIONS: &str = "GLINT-E-DUPLICATE-ACTIONS";
pub const GLINT_E_DUPLICATE_HOOKS: &str = "GLINT-E-DUPLICATE-HOOKS";
pub const GLINT_E_TAG_COLLISION: &str = "GLINT-E-TAG-COLLISION";
pub const GLINT_E_PARSE: &str = "GLINT-E-PARSE";
pub const GLINT_E_MISSING_ENTRY: &str = "GLINT-E-MISSING-ENTRY";

fn get_rationale(code: &str) -> &'static str {
    match code {
        GLINT_E_FORBIDDEN_STATE => "Components consume global state; they never create it.",
        GLINT_E_FORBIDDEN_ACTIONS => "Components use global actions; they never create them.",
        GLINT_E_FORBIDDEN_HOOKS => {
            "Hooks created inside a component outlive it. Register them with onStateChange so they are removed on unmount."
        }
        GLINT_W_GLOBAL_WRITE => "Global variables conflict across components and are hard to track.",
        GLINT_E_DUPLICATE_STATE | GLINT_E_DUPLICATE_ACTIONS | GLINT_E_DUPLICATE_HOOKS => {
            "Global declaration names are unique for the whole application."
        }
        GLINT_E_TAG_COLLISION => "Custom element tag names are unique per session.",
        GLINT_E_PARSE => "Component sources must be well formed.",
        GLINT_E_MISSING_ENTRY => "The entry HTML page hosts the compiled components.",
        _ => "Unknown rule.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Aborts the build
    Fatal,
    /// Reported; the affected unit is skipped
    Error,
    Warning,
}

impl Severity {
    /// Fatal outside production, a warning inside it.
    pub fn for_violation(mode: Mode) -> Self {
        if mode.is_production() {
            Severity::Warning
        } else {
            Severity::Fatal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for RelatedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {file}:{line}:{column}: {message}")]
pub struct CompilerError {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub rationale: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
    /// First occurrence, for duplicate diagnostics
    pub related: Option<RelatedLocation>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        let severity = if code.starts_with("GLINT-W-") {
            Severity::Warning
        } else {
            Severity::Error
        };
        CompilerError {
            code: code.to_string(),
            severity,
            message: message.to_string(),
            rationale: get_rationale(code).to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints,
            related: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_related(mut self, related: RelatedLocation) -> Self {
        self.related = Some(related);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Emit through `tracing` at the level matching the severity.
    pub fn log(&self) {
        match self.severity {
            Severity::Fatal | Severity::Error => tracing::error!(
                code = %self.code,
                file = %self.file,
                line = self.line,
                "{}",
                self.message
            ),
            Severity::Warning => tracing::warn!(
                code = %self.code,
                file = %self.file,
                line = self.line,
                "{}",
                self.message
            ),
        }
        for hint in &self.hints {
            tracing::debug!(code = %self.code, "hint: {}", hint);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT SCRIPT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref CREATE_STATE_RE: Regex = Regex::new(r"\bcreate(?:State|Store)\s*\(").unwrap();
    static ref CREATE_ACTIONS_RE: Regex = Regex::new(r"\bcreateActions\s*\(").unwrap();
    static ref CREATE_HOOKS_RE: Regex = Regex::new(r"\bcreateHooks\s*\(").unwrap();
    static ref GLOBAL_WRITE_RE: Regex =
        Regex::new(r"\b(?:window|globalThis)\s*\.\s*[A-Za-z_$][\w$]*\s*=(?:[^=]|$)").unwrap();
    static ref DECLARATION_LINE_RE: Regex = Regex::new(
        r#"\b(createState|createStore|createActions|createHooks)\s*\(\s*['"`]([^'"`]+)['"`]"#
    )
    .unwrap();
}

struct ForbiddenRule {
    pattern: &'static Regex,
    code: &'static str,
    factory: &'static str,
    replacement: &'static str,
}

fn forbidden_rules() -> [ForbiddenRule; 3] {
    [
        ForbiddenRule {
            pattern: &CREATE_HOOKS_RE,
            code: GLINT_E_FORBIDDEN_HOOKS,
            factory: "createHooks",
            replacement: "this.onStateChange('stateName', 'property', callback) inside onMounted() in the browser runtime, or MarkupElement::on_state_change from a Rust host; both hooks are removed on unmount",
        },
        ForbiddenRule {
            pattern: &CREATE_STATE_RE,
            code: GLINT_E_FORBIDDEN_STATE,
            factory: "createState",
            replacement: "getState('stateName'), after creating the state in a separate JS file",
        },
        ForbiddenRule {
            pattern: &CREATE_ACTIONS_RE,
            code: GLINT_E_FORBIDDEN_ACTIONS,
            factory: "createActions",
            replacement: "getActions('actionsName'), after creating the actions in a separate JS file",
        },
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub forbidden_calls: usize,
    pub diagnostics: Vec<CompilerError>,
}

impl ValidationReport {
    /// True unless a fatal diagnostic was produced.
    pub fn passed(&self) -> bool {
        !self.diagnostics.iter().any(CompilerError::is_fatal)
    }

    pub fn fatal(&self) -> impl Iterator<Item = &CompilerError> {
        self.diagnostics.iter().filter(|d| d.is_fatal())
    }
}

/// Check one component script. Never modifies the script; string and comment
/// content is ignored.
pub fn validate_component_script(script: &str, file_path: &str, mode: Mode) -> ValidationReport {
    let masked = mask_literals(script);
    let mut report = ValidationReport::default();

    for rule in forbidden_rules() {
        let matches: Vec<_> = rule.pattern.find_iter(&masked).collect();
        let Some(first) = matches.first() else {
            continue;
        };
        report.forbidden_calls += matches.len();

        let (line, column) = line_col(script, first.start());
        let diagnostic = CompilerError::with_details(
            rule.code,
            &format!(
                "Found {} usage(s) of {}() in component",
                matches.len(),
                rule.factory
            ),
            file_path,
            line,
            column,
            script.lines().nth(line as usize - 1).map(|l| l.trim().to_string()),
            vec![format!("Replace {}(...) with {}", rule.factory, rule.replacement)],
        )
        .with_severity(Severity::for_violation(mode));
        diagnostic.log();
        report.diagnostics.push(diagnostic);
    }

    let writes: Vec<_> = GLOBAL_WRITE_RE.find_iter(&masked).collect();
    if let Some(first) = writes.first() {
        let (line, column) = line_col(script, first.start());
        let diagnostic = CompilerError::with_details(
            GLINT_W_GLOBAL_WRITE,
            &format!(
                "Found {} global namespace assignment(s) in component. Consider using global state instead.",
                writes.len()
            ),
            file_path,
            line,
            column,
            None,
            vec!["Move shared values into createState() in a global script.".to_string()],
        );
        diagnostic.log();
        report.diagnostics.push(diagnostic);
    }

    report
}

// ═══════════════════════════════════════════════════════════════════════════════
// CROSS-FILE DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    State,
    Actions,
    Hooks,
}

impl DeclarationKind {
    pub fn from_factory(name: &str) -> Option<Self> {
        match name {
            "createState" | "createStore" => Some(DeclarationKind::State),
            "createActions" => Some(DeclarationKind::Actions),
            "createHooks" => Some(DeclarationKind::Hooks),
            _ => None,
        }
    }

    fn duplicate_code(self) -> &'static str {
        match self {
            DeclarationKind::State => GLINT_E_DUPLICATE_STATE,
            DeclarationKind::Actions => GLINT_E_DUPLICATE_ACTIONS,
            DeclarationKind::Hooks => GLINT_E_DUPLICATE_HOOKS,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DeclarationKind::State => "state",
            DeclarationKind::Actions => "actions",
            DeclarationKind::Hooks => "hooks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

struct DeclarationVisitor<'s> {
    source: &'s str,
    file: &'s str,
    found: Vec<Declaration>,
}

impl<'a, 's> oxc_ast_visit::Visit<'a> for DeclarationVisitor<'s> {
    fn visit_call_expression(&mut self, expr: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &expr.callee {
            if let Some(kind) = DeclarationKind::from_factory(ident.name.as_str()) {
                let name = match expr.arguments.first() {
                    Some(Argument::StringLiteral(lit)) => Some(lit.value.to_string()),
                    Some(Argument::TemplateLiteral(tpl)) if tpl.expressions.is_empty() => tpl
                        .quasis
                        .first()
                        .map(|q| q.value.cooked.unwrap_or(q.value.raw).to_string()),
                    _ => None,
                };
                if let Some(name) = name {
                    let (line, column) = line_col(self.source, expr.span.start as usize);
                    self.found.push(Declaration {
                        kind,
                        name,
                        file: self.file.to_string(),
                        line,
                        column,
                    });
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, expr);
    }
}

/// Every literal-named `createState`/`createStore`/`createActions`/`createHooks`
/// call in a script, in source order. Scripts oxc cannot parse (markup component
/// scripts with method shorthand, for example) fall back to a line scan.
pub fn collect_declarations(source: &str, file: &str) -> Vec<Declaration> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();

    if ret.errors.is_empty() {
        let mut visitor = DeclarationVisitor {
            source,
            file,
            found: Vec::new(),
        };
        oxc_ast_visit::Visit::visit_program(&mut visitor, &ret.program);
        return visitor.found;
    }

    tracing::debug!(file, errors = ret.errors.len(), "falling back to line scan for declarations");
    // Matches are taken from the source (the name is a literal) but only kept
    // when the factory name is code, not string or comment content.
    let masked = mask_literals(source);
    let mut found = Vec::new();
    for caps in DECLARATION_LINE_RE.captures_iter(source) {
        let (Some(factory), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if masked.get(factory.range()) != Some(factory.as_str()) {
            continue;
        }
        if let Some(kind) = DeclarationKind::from_factory(factory.as_str()) {
            let (line, column) = line_col(source, factory.start());
            found.push(Declaration {
                kind,
                name: name.as_str().to_string(),
                file: file.to_string(),
                line,
                column,
            });
        }
    }
    found
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarationSummary {
    pub states: Vec<String>,
    pub actions: Vec<String>,
    pub hooks: Vec<String>,
}

/// First-occurrence registry, one namespace per declaration kind.
#[derive(Debug, Clone)]
pub struct DeclarationRegistry {
    mode: Mode,
    first_seen: HashMap<(DeclarationKind, String), usize>,
    declarations: Vec<Declaration>,
}

impl DeclarationRegistry {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            first_seen: HashMap::new(),
            declarations: Vec::new(),
        }
    }

    /// Register every declaration in `source`, returning one diagnostic per
    /// repeated name. Feed files in a stable order for stable output.
    pub fn scan(&mut self, file: &str, source: &str) -> Vec<CompilerError> {
        collect_declarations(source, file)
            .into_iter()
            .filter_map(|decl| self.register(decl))
            .collect()
    }

    pub fn register(&mut self, decl: Declaration) -> Option<CompilerError> {
        let key = (decl.kind, decl.name.clone());
        if let Some(&index) = self.first_seen.get(&key) {
            let first = &self.declarations[index];
            let diagnostic = CompilerError::with_details(
                decl.kind.duplicate_code(),
                &format!("Duplicate {} name \"{}\"", decl.kind.label(), decl.name),
                &decl.file,
                decl.line,
                decl.column,
                Some(format!(
                    "First declared in {}:{}\nDuplicate found in {}:{}",
                    first.file, first.line, decl.file, decl.line
                )),
                vec![format!(
                    "Rename one of the {} declarations or reuse the existing one.",
                    decl.kind.label()
                )],
            )
            .with_severity(Severity::for_violation(self.mode))
            .with_related(RelatedLocation {
                file: first.file.clone(),
                line: first.line,
                column: first.column,
            });
            diagnostic.log();
            return Some(diagnostic);
        }

        self.first_seen.insert(key, self.declarations.len());
        self.declarations.push(decl);
        None
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn summary(&self) -> DeclarationSummary {
        let names = |kind: DeclarationKind| -> Vec<String> {
            self.declarations
                .iter()
                .filter(|d| d.kind == kind)
                .map(|d| d.name.clone())
                .collect()
        };
        DeclarationSummary {
            states: names(DeclarationKind::State),
            actions: names(DeclarationKind::Actions),
            hooks: names(DeclarationKind::Hooks),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            states = ?summary.states,
            actions = ?summary.actions,
            hooks = ?summary.hooks,
            "global declarations validated"
        );
    }
}

/// Two components deriving the same custom element tag.
pub fn tag_collision(tag: &str, first_file: &str, second_file: &str, mode: Mode) -> CompilerError {
    CompilerError::with_details(
        GLINT_E_TAG_COLLISION,
        &format!("Tag <{}> is derived by more than one component", tag),
        second_file,
        1,
        1,
        Some(format!("First defined by {}\nAlso derived by {}", first_file, second_file)),
        vec!["Rename one of the component files.".to_string()],
    )
    .with_severity(Severity::for_violation(mode))
    .with_related(RelatedLocation {
        file: first_file.to_string(),
        line: 1,
        column: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_hooks_fatal_in_development() {
        let script = "onMounted() {\n  createHooks('counter', { count: () => {} });\n}";
        let report = validate_component_script(script, "c.glint", Mode::Development);
        assert_eq!(report.forbidden_calls, 1);
        assert!(!report.passed());
        let diag = &report.diagnostics[0];
        assert_eq!(diag.code, GLINT_E_FORBIDDEN_HOOKS);
        assert_eq!(diag.line, 2);
    }

    #[test]
    fn test_forbidden_calls_warn_in_production() {
        let script = "createState('a', {}); createActions('a', {});";
        let report = validate_component_script(script, "c.glint", Mode::Production);
        assert_eq!(report.forbidden_calls, 2);
        assert!(report.passed());
        assert!(report.diagnostics.iter().all(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn test_forbidden_calls_in_strings_and_comments_ignored() {
        let script = "// createHooks(\nthis.msg = 'createState(';\nconst t = `createActions(`;";
        let report = validate_component_script(script, "c.glint", Mode::Development);
        assert_eq!(report.forbidden_calls, 0);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_global_write_is_advisory() {
        let script = "window.counter = 1;\nif (window.ready == true) {}";
        let report = validate_component_script(script, "c.glint", Mode::Development);
        assert!(report.passed());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code, GLINT_W_GLOBAL_WRITE);
        assert_eq!(report.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let script = "createHooks('a', {});\nwindow.x = 1;\ncreateState('b', {});";
        let a = validate_component_script(script, "c.glint", Mode::Development);
        let b = validate_component_script(script, "c.glint", Mode::Development);
        assert_eq!(a, b);
    }

    #[test]
    fn test_collect_declarations_with_oxc() {
        let src = "const s = createState('theme', { dark: false });\ncreateActions(`theme`, {});\ncreateStore(\"user\", {});";
        let decls = collect_declarations(src, "store.js");
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[0].kind, DeclarationKind::State);
        assert_eq!(decls[0].name, "theme");
        assert_eq!(decls[1].kind, DeclarationKind::Actions);
        assert_eq!(decls[2].name, "user");
        assert_eq!(decls[2].line, 3);
    }

    #[test]
    fn test_collect_declarations_fallback() {
        // Method shorthand at top level is not valid JavaScript
        let src = "increment() {\n  createState('x', {})\n}";
        let decls = collect_declarations(src, "c.glint");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].line, 2);
    }

    #[test]
    fn test_fallback_ignores_strings_and_block_comments() {
        let src = "render() {\n  const s = \"createState('theme', {})\";\n  /* createActions('cart', {})\n  createHooks('theme', {}) */\n  createState('real', {})\n}";
        let decls = collect_declarations(src, "c.glint");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "real");
        assert_eq!((decls[0].line, decls[0].column), (5, 3));
    }

    #[test]
    fn test_hooks_hint_names_supported_registration() {
        let report = validate_component_script("createHooks('a', {})", "c.glint", Mode::Development);
        let hint = &report.diagnostics[0].hints[0];
        assert!(hint.contains("onMounted()"));
        assert!(hint.contains("MarkupElement::on_state_change"));
    }

    #[test]
    fn test_duplicate_declarations_report_both_locations() {
        let mut registry = DeclarationRegistry::new(Mode::Development);
        assert!(registry.scan("a.js", "createState('theme', {});").is_empty());
        let errors = registry.scan("b.js", "\n\ncreateState('theme', {});");
        assert_eq!(errors.len(), 1);
        let err = &errors[0];
        assert_eq!(err.code, GLINT_E_DUPLICATE_STATE);
        assert!(err.is_fatal());
        assert_eq!((err.file.as_str(), err.line), ("b.js", 3));
        let related = err.related.as_ref().unwrap();
        assert_eq!((related.file.as_str(), related.line), ("a.js", 1));
    }

    #[test]
    fn test_same_name_in_different_kinds_is_allowed() {
        let mut registry = DeclarationRegistry::new(Mode::Development);
        let errors = registry.scan(
            "a.js",
            "createState('cart', {}); createActions('cart', {}); createHooks('cart', {});",
        );
        assert!(errors.is_empty());
        let summary = registry.summary();
        assert_eq!(summary.states, vec!["cart"]);
        assert_eq!(summary.actions, vec!["cart"]);
        assert_eq!(summary.hooks, vec!["cart"]);
    }

    #[test]
    fn test_compiler_error_display() {
        let err = CompilerError::new(GLINT_E_PARSE, "bad", "x.glint", 3, 4);
        assert_eq!(err.to_string(), "[GLINT-E-PARSE] x.glint:3:4: bad");
        assert_eq!(err.severity, Severity::Error);
    }
}
