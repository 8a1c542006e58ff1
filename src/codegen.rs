//! Codegen module for Glint components
//!
//! Turns a [`ComponentRecord`] into a [`ComponentDefinition`]: the data a
//! runtime needs to register the component, plus the self-registering
//! JavaScript class text emitted into the bundle.

use serde::{Deserialize, Serialize};

use crate::lexer::{partition_script, MethodSource};
use crate::parse::{ComponentRecord, Dialect};

/// Runtime globals every emitted class depends on.
pub const RUNTIME_SURFACE: &[&str] = &["GlintElement", "createComponent", "customElements"];

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub class_name: String,
    pub tag_name: String,
    pub dialect: Dialect,
    pub file_path: String,
    pub template: String,
    pub style: String,
    pub reactive_vars: Vec<String>,
    /// Every declared prop, so attribute changes reach the instance
    pub observed_attributes: Vec<String>,
    /// Prop defaults first, then the script's own top-level statements
    pub init_statements: Vec<String>,
    pub methods: Vec<MethodSource>,
    pub entry_point: Option<String>,
    /// Function dialect: the component source, emitted verbatim
    pub source: String,
}

impl ComponentDefinition {
    pub fn method(&self, name: &str) -> Option<&MethodSource> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.method(name).is_some()
    }

    /// The self-registering JavaScript for this component.
    pub fn to_js(&self) -> String {
        match self.dialect {
            Dialect::Markup => self.markup_class_js(),
            Dialect::Function => self.function_component_js(),
        }
    }

    fn markup_class_js(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("class {} extends GlintElement {{\n", self.class_name));

        out.push_str("  constructor() {\n    super();\n");
        out.push_str(&format!(
            "    this._template = `{}`;\n",
            escape_template_literal(&self.template)
        ));
        out.push_str(&format!(
            "    this._styles = `{}`;\n",
            escape_template_literal(&self.style)
        ));
        out.push_str("  }\n\n");

        out.push_str(&format!(
            "  static get observedAttributes() {{\n    return {};\n  }}\n\n",
            js_string_array(&self.observed_attributes)
        ));

        out.push_str(&format!(
            "  _getReactiveVars() {{\n    return {};\n  }}\n\n",
            js_string_array(&self.reactive_vars)
        ));

        out.push_str("  _initializeData() {\n");
        for statement in &self.init_statements {
            for line in statement.lines() {
                out.push_str("    ");
                out.push_str(line.trim_end());
                out.push('\n');
            }
            if !statement.trim_end().ends_with('}') {
                // restore the terminator stripped during partitioning
                out.pop();
                out.push_str(";\n");
            }
        }
        out.push_str("  }\n");

        for method in &self.methods {
            out.push_str(&format!(
                "\n  {}({}) {{{}}}\n",
                method.name,
                method.params.join(", "),
                method.body
            ));
        }

        out.push_str("}\n\n");
        out.push_str(&format!(
            "customElements.define({}, {});\n",
            js_string(&self.tag_name),
            self.class_name
        ));
        out
    }

    fn function_component_js(&self) -> String {
        let entry = self.entry_point.as_deref().unwrap_or(&self.class_name);
        let tag = js_string(&self.tag_name);
        format!(
            "// {}\n{}\n\ncustomElements.define({}, createComponent({}, {}, {}));\n",
            self.file_path,
            self.source.trim_end(),
            tag,
            entry,
            tag,
            js_string_array(&self.observed_attributes)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn generate_component(record: &ComponentRecord) -> ComponentDefinition {
    let (init_statements, methods) = match record.dialect {
        Dialect::Markup => {
            let partition = partition_script(&record.script);
            let mut init: Vec<String> = record
                .ordered_defaults()
                .map(|(prop, default)| format!("this.{} = {}", prop, default))
                .collect();
            init.extend(partition.init);
            (init, partition.methods)
        }
        Dialect::Function => (Vec::new(), Vec::new()),
    };

    tracing::debug!(
        component = %record.name,
        tag = %record.tag_name,
        init = init_statements.len(),
        methods = methods.len(),
        "generated component definition"
    );

    ComponentDefinition {
        class_name: record.name.clone(),
        tag_name: record.tag_name.clone(),
        dialect: record.dialect,
        file_path: record.file_path.clone(),
        template: record.template.clone(),
        style: record.style.clone(),
        reactive_vars: record.reactive_vars.clone(),
        observed_attributes: record.props.clone(),
        init_statements,
        methods,
        entry_point: record.entry_point.clone(),
        source: match record.dialect {
            Dialect::Function => record.script.clone(),
            Dialect::Markup => String::new(),
        },
    }
}

/// Concatenate generated components, in order, after the bundle header.
pub fn generate_bundle(definitions: &[ComponentDefinition]) -> String {
    let mut bundle = format!(
        "// Glint component bundle ({} component(s))\n// Requires runtime globals: {}\n",
        definitions.len(),
        RUNTIME_SURFACE.join(", ")
    );
    for definition in definitions {
        bundle.push('\n');
        bundle.push_str(&definition.to_js());
    }
    bundle
}

// ═══════════════════════════════════════════════════════════════════════════════
// JS TEXT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Escape text for a backtick template literal. `{{ }}` placeholders pass
/// through untouched; only `${` would be live inside the literal.
pub fn escape_template_literal(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn js_string_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_component;

    const COUNTER: &str = r#"<template>
  <button onclick="this.increment()">{{ this.label }}: {{ this.count }}</button>
</template>
<script>
export let label = 'Count'
export let step
this.count = 0
function increment() {
  this.count = this.count + 1
}
reset() { this.count = 0 }
</script>
<style>
button { color: `red`; }
</style>"#;

    fn counter() -> ComponentDefinition {
        let record = parse_component(COUNTER, "src/counter-button.glint").unwrap();
        generate_component(&record)
    }

    #[test]
    fn test_prop_defaults_precede_user_init() {
        let def = counter();
        assert_eq!(
            def.init_statements,
            vec!["this.label = 'Count'".to_string(), "this.count = 0".to_string()]
        );
    }

    #[test]
    fn test_methods_partitioned() {
        let def = counter();
        let names: Vec<&str> = def.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["increment", "reset"]);
        assert!(def.has_method("reset"));
        assert!(!def.has_method("label"));
    }

    #[test]
    fn test_observed_attributes_are_all_props() {
        let def = counter();
        assert_eq!(def.observed_attributes, vec!["label", "step"]);
        let js = def.to_js();
        assert!(js.contains("static get observedAttributes() {\n    return [\"label\",\"step\"];"));
    }

    #[test]
    fn test_markup_class_js() {
        let js = counter().to_js();
        assert!(js.starts_with("class CounterButtonComponent extends GlintElement {"));
        assert!(js.contains("return [\"count\"];"));
        assert!(js.contains("    this.label = 'Count';\n    this.count = 0;\n"));
        assert!(js.contains("\n  increment() {"));
        assert!(js.contains("customElements.define(\"counter-button\", CounterButtonComponent);"));
        assert!(js.contains("color: \\`red\\`;"));
    }

    #[test]
    fn test_escape_template_literal() {
        assert_eq!(escape_template_literal("a`b"), "a\\`b");
        assert_eq!(escape_template_literal("${x}"), "\\${x}");
        assert_eq!(escape_template_literal("{{ x }}"), "{{ x }}");
        assert_eq!(escape_template_literal("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_function_component_js() {
        let source = "function UserCard(props) {\n  return `<p>${props.name}</p>`\n}\n";
        let record = parse_component(source, "src/user-card.glint.js").unwrap();
        let def = generate_component(&record);
        assert_eq!(def.entry_point.as_deref(), Some("UserCard"));
        let js = def.to_js();
        assert!(js.starts_with("// src/user-card.glint.js\nfunction UserCard(props)"));
        assert!(js.ends_with(
            "customElements.define(\"user-card\", createComponent(UserCard, \"user-card\", [\"name\"]));\n"
        ));
    }

    #[test]
    fn test_bundle_keeps_order() {
        let a = counter();
        let mut b = counter();
        b.class_name = "OtherComponent".to_string();
        b.tag_name = "other-component".to_string();
        let bundle = generate_bundle(&[a, b]);
        assert!(bundle.starts_with("// Glint component bundle (2 component(s))"));
        assert!(bundle.contains("GlintElement, createComponent, customElements"));
        let first = bundle.find("class CounterButtonComponent").unwrap();
        let second = bundle.find("class OtherComponent").unwrap();
        assert!(first < second);
    }
}
