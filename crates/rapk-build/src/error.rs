use std::{io, path::PathBuf};

use rapk_toolchain::ToolError;

use crate::strategy::TemplateKind;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{tool} is unavailable: {detail}")]
    ToolUnavailable { tool: String, detail: String },
    #[error("{kind} template is unavailable: {reason}")]
    TemplateUnavailable { kind: TemplateKind, reason: String },
    #[error("{step} failed: {detail}")]
    ExternalToolFailure { step: String, detail: String },
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("resource xml error in {}: {message}", path.display())]
    Xml { path: PathBuf, message: String },
    #[error("build worker stopped: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> BuildError {
        let path = path.into();
        move |source| BuildError::Io { path, source }
    }

    /// Stable machine-readable tag, used in job records.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::ToolUnavailable { .. } => "tool_unavailable",
            BuildError::TemplateUnavailable { .. } => "template_unavailable",
            BuildError::ExternalToolFailure { .. } => "external_tool_failure",
            BuildError::MissingInput(_) => "missing_input",
            BuildError::Io { .. } => "io",
            BuildError::Archive(_) => "archive",
            BuildError::Xml { .. } => "xml",
            BuildError::Join(_) => "worker",
        }
    }
}

impl From<ToolError> for BuildError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Unavailable { tool, searched } => BuildError::ToolUnavailable {
                tool,
                detail: format!("not found under {}", searched.display()),
            },
            ToolError::Failed { tool, source } => BuildError::ExternalToolFailure {
                step: tool,
                detail: source.to_string(),
            },
        }
    }
}
