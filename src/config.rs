//! Compiler configuration
//!
//! `glint.config.json` at the project root, with the execution mode taken
//! from `GLINT_ENV` / `NODE_ENV`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GlintError;

pub const CONFIG_FILE: &str = "glint.config.json";

/// Execution mode. Production downgrades architectural violations to warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn from_env() -> Self {
        let value = std::env::var("GLINT_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .unwrap_or_default();
        Self::parse(&value)
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Mode::Production
        } else {
            Mode::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == Mode::Production
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub mode: Mode,
    pub src_dir: PathBuf,
    pub out_dir: PathBuf,
    pub entry_html: PathBuf,
    pub cache: bool,
    pub cache_dir: PathBuf,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Development,
            src_dir: PathBuf::from("src"),
            out_dir: PathBuf::from("build"),
            entry_html: PathBuf::from("src/index.html"),
            cache: true,
            cache_dir: PathBuf::from(".glint/cache"),
        }
    }
}

impl CompileOptions {
    /// Defaults with the mode taken from the environment.
    pub fn from_env() -> Self {
        Self {
            mode: Mode::from_env(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Load `glint.config.json` from `root` if present. An explicit
    /// production environment always wins over the file.
    pub fn load(root: &Path) -> Result<Self, GlintError> {
        let path = root.join(CONFIG_FILE);
        let mut options = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str::<CompileOptions>(&data).map_err(|e| {
                GlintError::Config(format!("{}: {}", path.display(), e))
            })?
        } else {
            Self::default()
        };

        if Mode::from_env().is_production() {
            options.mode = Mode::Production;
        }

        tracing::debug!(mode = ?options.mode, "loaded compile options");
        Ok(options)
    }
}
