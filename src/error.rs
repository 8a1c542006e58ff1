use crate::validate::CompilerError;

#[derive(Debug, thiserror::Error)]
pub enum GlintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Build failed with {} error(s): {}", .0.len(), summarize(.0))]
    Compile(Vec<CompilerError>),
}

impl GlintError {
    /// Fatal diagnostics carried by a failed build, if any.
    pub fn diagnostics(&self) -> &[CompilerError] {
        match self {
            GlintError::Compile(errors) => errors,
            _ => &[],
        }
    }
}

fn summarize(errors: &[CompilerError]) -> String {
    errors
        .iter()
        .map(|e| e.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
