use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A required parameter was absent or carried an unusable value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required parameter `{field}`")]
    Missing { field: &'static str },
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn field(&self) -> &'static str {
        match self {
            ConfigError::Missing { field } | ConfigError::Invalid { field, .. } => field,
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{host} is not supported (supported hosts: {supported})")]
    UnsupportedPlatform { host: String, supported: String },

    #[error("failed to locate {what} at {}", path.display())]
    PathNotFound { what: String, path: PathBuf },

    #[error("failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to fetch {url} (branch {branch}): {reason}")]
    Fetch {
        url: String,
        branch: String,
        reason: String,
    },

    #[error("{tool} {}{}", describe_exit(*exit_code), stderr_suffix(stderr))]
    ToolInvocation {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn path_not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PipelineError::PathNotFound {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::UnsupportedPlatform { .. } => "unsupported_platform",
            PipelineError::PathNotFound { .. } => "path_not_found",
            PipelineError::Cleanup { .. } => "cleanup",
            PipelineError::Fetch { .. } => "fetch",
            PipelineError::ToolInvocation { .. } => "tool_invocation",
            PipelineError::Launch { .. } => "launch",
            PipelineError::Io { .. } => "io",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::ToolInvocation { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// A pipeline run stopped at `stage` because of `source`.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageFailure {
    pub stage: String,
    #[source]
    pub source: PipelineError,
}

impl StageFailure {
    pub fn new(stage: impl Into<String>, source: PipelineError) -> Self {
        Self {
            stage: stage.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_message_carries_stderr() {
        let err = PipelineError::ToolInvocation {
            tool: "AutomationTool".into(),
            exit_code: Some(25),
            stderr: "  cook failed\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "AutomationTool exited with status 25: cook failed"
        );
        assert_eq!(err.exit_code(), Some(25));
    }

    #[test]
    fn stage_failure_names_stage() {
        let failure = StageFailure::new(
            "validate",
            ConfigError::Missing {
                field: "repo_url",
            }
            .into(),
        );
        assert_eq!(
            failure.to_string(),
            "validate stage failed: missing required parameter `repo_url`"
        );
        assert_eq!(failure.source.kind(), "config");
    }
}
