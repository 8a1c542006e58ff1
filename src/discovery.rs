//! Project discovery and the build pipeline
//!
//! Walks the source directory, parses every component (in parallel), runs the
//! per-component and cross-file validators, and generates the bundle.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cache::IncrementalCache;
use crate::codegen::{generate_bundle, generate_component, ComponentDefinition};
use crate::config::CompileOptions;
use crate::error::GlintError;
use crate::parse::{parse_component, ComponentRecord};
use crate::validate::{
    tag_collision, validate_component_script, CompilerError, DeclarationRegistry,
    DeclarationSummary, Severity, GLINT_E_MISSING_ENTRY,
};

/// File name of the generated bundle inside the output directory.
pub const BUNDLE_FILE: &str = "glint-components.js";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    /// `*.glint` and `*.glint.js`
    pub components: Vec<PathBuf>,
    /// Every other `*.js` file
    pub scripts: Vec<PathBuf>,
}

pub fn is_component_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".glint") || name.ends_with(".glint.js")
}

/// Recursively find component and global script files, each sorted by path.
pub fn discover_sources(src_dir: &Path) -> SourceSet {
    let mut set = SourceSet::default();

    for entry in WalkDir::new(src_dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if is_component_file(path) {
            set.components.push(path.to_path_buf());
        } else if path.extension().is_some_and(|ext| ext == "js") {
            set.scripts.push(path.to_path_buf());
        }
    }

    set.components.sort();
    set.scripts.sort();
    set
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub records: Vec<ComponentRecord>,
    pub definitions: Vec<ComponentDefinition>,
    pub bundle: String,
    /// Every diagnostic, fatal or not, in pipeline order
    pub diagnostics: Vec<CompilerError>,
    pub summary: DeclarationSummary,
    pub missing_entry: bool,
}

impl BuildOutput {
    pub fn warnings(&self) -> impl Iterator<Item = &CompilerError> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Write the bundle into `out_dir`, returning its path.
    pub fn write_bundle(&self, out_dir: &Path) -> Result<PathBuf, GlintError> {
        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(BUNDLE_FILE);
        fs::write(&path, &self.bundle)?;
        tracing::info!(path = %path.display(), bytes = self.bundle.len(), "bundle written");
        Ok(path)
    }
}

/// Paths in diagnostics are relative to the project root with `/` separators.
fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

struct SourceFile {
    path: String,
    source: String,
}

fn read_sources(root: &Path, paths: &[PathBuf]) -> Result<Vec<SourceFile>, GlintError> {
    paths
        .iter()
        .map(|p| {
            Ok(SourceFile {
                path: display_path(root, p),
                source: fs::read_to_string(p)?,
            })
        })
        .collect()
}

pub fn build_project(root: &Path, options: &CompileOptions) -> Result<BuildOutput, GlintError> {
    let mode = options.mode;
    let mut diagnostics: Vec<CompilerError> = Vec::new();

    // ─── Entry page ───
    let entry_html = root.join(&options.entry_html);
    let missing_entry = !entry_html.exists();
    if missing_entry {
        let diagnostic = CompilerError::with_details(
            GLINT_E_MISSING_ENTRY,
            "Entry HTML file not found; page injection is skipped",
            &display_path(root, &entry_html),
            1,
            1,
            None,
            vec!["Create the entry page or set entryHtml in glint.config.json.".to_string()],
        );
        diagnostic.log();
        diagnostics.push(diagnostic);
    }

    // ─── Discovery ───
    let sources = discover_sources(&root.join(&options.src_dir));
    let component_files = read_sources(root, &sources.components)?;
    let script_files = read_sources(root, &sources.scripts)?;
    tracing::info!(
        components = component_files.len(),
        scripts = script_files.len(),
        "discovered sources"
    );

    // ─── Parse ───
    let cache = options
        .cache
        .then(|| IncrementalCache::new(root.join(&options.cache_dir)));

    let mut parsed: Vec<(String, Result<ComponentRecord, CompilerError>)> = component_files
        .par_iter()
        .map(|file| {
            let cached = cache.as_ref().and_then(|c| c.get(&file.path, &file.source));
            let result = match cached {
                Some(record) => Ok(record),
                None => parse_component(&file.source, &file.path).inspect(|record| {
                    if let Some(cache) = &cache {
                        cache.set(&file.path, &file.source, record);
                    }
                }),
            };
            (file.path.clone(), result)
        })
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut records = Vec::with_capacity(parsed.len());
    for (_, result) in parsed {
        match result {
            Ok(record) => records.push(record),
            Err(diagnostic) => {
                diagnostic.log();
                diagnostics.push(diagnostic);
            }
        }
    }

    // ─── Per-component validation ───
    // Function components are validated over their whole source
    for record in &records {
        let report = validate_component_script(&record.script, &record.file_path, mode);
        diagnostics.extend(report.diagnostics);
    }

    // ─── Cross-file duplicate declarations ───
    let mut scanned: Vec<(&str, &str)> = records
        .iter()
        .map(|r| (r.file_path.as_str(), r.script.as_str()))
        .chain(script_files.iter().map(|f| (f.path.as_str(), f.source.as_str())))
        .collect();
    scanned.sort_by(|a, b| a.0.cmp(b.0));

    let mut registry = DeclarationRegistry::new(mode);
    for (file, source) in scanned {
        diagnostics.extend(registry.scan(file, source));
    }
    registry.log_summary();

    // ─── Tag uniqueness ───
    let mut tags: BTreeMap<&str, &str> = BTreeMap::new();
    for record in &records {
        if let Some(first) = tags.insert(&record.tag_name, &record.file_path) {
            let diagnostic = tag_collision(&record.tag_name, first, &record.file_path, mode);
            diagnostic.log();
            diagnostics.push(diagnostic);
            tags.insert(&record.tag_name, first);
        }
    }

    let fatal: Vec<CompilerError> = diagnostics.iter().filter(|d| d.is_fatal()).cloned().collect();
    if !fatal.is_empty() {
        tracing::error!(count = fatal.len(), "build aborted");
        return Err(GlintError::Compile(fatal));
    }

    // ─── Generate ───
    let definitions: Vec<ComponentDefinition> = records.iter().map(generate_component).collect();
    let bundle = generate_bundle(&definitions);

    tracing::info!(
        components = definitions.len(),
        diagnostics = diagnostics.len(),
        "build complete"
    );

    Ok(BuildOutput {
        records,
        definitions,
        bundle,
        diagnostics,
        summary: registry.summary(),
        missing_entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::validate::{GLINT_E_DUPLICATE_STATE, GLINT_E_PARSE, GLINT_E_TAG_COLLISION};

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, contents).unwrap();
        }
        dir
    }

    const COUNTER: &str = "<template><button onclick=\"this.add()\">{{ this.count }}</button></template>\n<script>\ncount = 0\nadd() {\n  this.count += 1\n}\n</script>";

    #[test]
    fn test_discover_sorts_and_classifies() {
        let dir = project(&[
            ("src/z.glint", ""),
            ("src/nested/a.glint", ""),
            ("src/hello.glint.js", ""),
            ("src/store.js", ""),
            ("src/readme.md", ""),
        ]);
        let set = discover_sources(&dir.path().join("src"));
        let names: Vec<String> = set
            .components
            .iter()
            .map(|p| display_path(&dir.path().join("src"), p))
            .collect();
        assert_eq!(names, vec!["hello.glint.js", "nested/a.glint", "z.glint"]);
        assert_eq!(set.scripts.len(), 1);
        assert!(set.scripts[0].ends_with("store.js"));
    }

    #[test]
    fn test_build_generates_bundle() {
        let dir = project(&[
            ("src/index.html", "<html></html>"),
            ("src/counter.glint", COUNTER),
            (
                "src/hello.glint.js",
                "function Hello(props) { return `<p>${props.name}</p>`; }",
            ),
            ("src/store.js", "createState('session', { user: null });"),
        ]);
        let options = CompileOptions::default().with_mode(Mode::Development);
        let output = build_project(dir.path(), &options).unwrap();

        assert!(!output.missing_entry);
        assert_eq!(output.definitions.len(), 2);
        assert_eq!(output.records[0].file_path, "src/counter.glint");
        assert_eq!(output.summary.states, vec!["session"]);
        assert!(output.bundle.contains("class CounterComponent extends GlintElement"));
        assert!(output.bundle.contains("createComponent(Hello"));

        // Parsed records were cached
        assert_eq!(fs::read_dir(dir.path().join(".glint/cache")).unwrap().count(), 2);

        let written = output.write_bundle(&dir.path().join("build")).unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), output.bundle);
    }

    #[test]
    fn test_missing_entry_is_recorded_not_fatal() {
        let dir = project(&[("src/counter.glint", COUNTER)]);
        let mut options = CompileOptions::default();
        options.cache = false;
        let output = build_project(dir.path(), &options).unwrap();

        assert!(output.missing_entry);
        assert_eq!(output.diagnostics[0].code, GLINT_E_MISSING_ENTRY);
        assert_eq!(output.definitions.len(), 1);
    }

    #[test]
    fn test_parse_failure_skips_only_that_component() {
        let dir = project(&[
            ("src/index.html", ""),
            ("src/broken.glint", "<template><p>never closed"),
            ("src/counter.glint", COUNTER),
        ]);
        let mut options = CompileOptions::default();
        options.cache = false;
        let output = build_project(dir.path(), &options).unwrap();

        assert_eq!(output.definitions.len(), 1);
        assert_eq!(output.definitions[0].class_name, "CounterComponent");
        assert!(output.diagnostics.iter().any(|d| d.code == GLINT_E_PARSE));
    }

    #[test]
    fn test_tag_collision_is_fatal() {
        let dir = project(&[
            ("src/index.html", ""),
            ("src/todo-list.glint", COUNTER),
            ("src/todo_list.glint", COUNTER),
        ]);
        let mut options = CompileOptions::default();
        options.cache = false;
        let err = build_project(dir.path(), &options).unwrap_err();

        let diag = &err.diagnostics()[0];
        assert_eq!(diag.code, GLINT_E_TAG_COLLISION);
        assert_eq!(diag.file, "src/todo_list.glint");
        assert_eq!(diag.related.as_ref().unwrap().file, "src/todo-list.glint");
    }

    #[test]
    fn test_duplicates_only_warn_in_production() {
        let dir = project(&[
            ("src/index.html", ""),
            ("src/a.js", "createState('theme', { dark: false });"),
            ("src/b.js", "createState('theme', { dark: true });"),
        ]);
        let mut options = CompileOptions::default().with_mode(Mode::Production);
        options.cache = false;
        let output = build_project(dir.path(), &options).unwrap();

        let warning = output.warnings().next().unwrap();
        assert_eq!(warning.code, GLINT_E_DUPLICATE_STATE);
        assert_eq!(output.summary.states, vec!["theme"]);
    }
}
