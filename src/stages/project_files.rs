use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::tools::run_invocation;
use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StagePhase, StageResult};
use crate::process::{ToolInvocation, is_explicit_path};

const PROJECT_FILES_STAGE: &str = "generate-project-files";
const GENERATOR_LABEL: &str = "project file generator";

/// Shell integration registered by the engine launcher for "Generate Visual Studio
/// project files".
pub const GENERATOR_REGISTRY_KEY: &str =
    r"HKEY_CLASSES_ROOT\Unreal.ProjectFile\shell\rungenproj\command";

/// Regenerates the IDE solution for the project, either with an explicitly configured
/// generator or with the command registered in the shell integration.
pub struct ProjectFilesStage;

impl ProjectFilesStage {
    fn explicit(generator: &Path, project_file: &Path) -> ToolInvocation {
        ToolInvocation::new(GENERATOR_LABEL, generator)
            .arg("/projectfiles")
            .arg(project_file.display().to_string())
    }

    fn resolve(ctx: &PipelineContext<'_>) -> Result<ToolInvocation, PipelineError> {
        let project_file = &ctx.layout.project_file;
        let invocation = match &ctx.config.generator {
            Some(generator) => Self::explicit(generator, project_file),
            None => {
                let template = query_registered_command().ok_or_else(|| {
                    PipelineError::path_not_found(
                        GENERATOR_LABEL,
                        PathBuf::from(GENERATOR_REGISTRY_KEY),
                    )
                })?;
                debug!(template = template.as_str(), "Using registered generator");
                let mut parts = expand_command(&template, project_file).into_iter();
                let program = parts.next().ok_or_else(|| {
                    PipelineError::path_not_found(
                        GENERATOR_LABEL,
                        PathBuf::from(GENERATOR_REGISTRY_KEY),
                    )
                })?;
                ToolInvocation::new(GENERATOR_LABEL, program).args(parts)
            }
        };
        Ok(invocation.current_dir(&ctx.config.project_path))
    }
}

impl Stage for ProjectFilesStage {
    fn name(&self) -> &str {
        PROJECT_FILES_STAGE
    }

    fn phase(&self) -> StagePhase {
        StagePhase::Tool
    }

    /// Only known up front when the generator is configured; the registered command is
    /// looked up when the stage runs.
    fn invocation(&self, ctx: &PipelineContext<'_>) -> Option<ToolInvocation> {
        ctx.config.generator.as_ref().map(|generator| {
            Self::explicit(generator, &ctx.layout.project_file)
                .current_dir(&ctx.config.project_path)
        })
    }

    fn run(&self, ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError> {
        let invocation = Self::resolve(ctx)?;
        if is_explicit_path(&invocation.program) && !invocation.program.is_file() {
            return Err(PipelineError::path_not_found(
                GENERATOR_LABEL,
                invocation.program.clone(),
            ));
        }
        info!(project = %ctx.layout.project_file.display(), "Generating project files");
        run_invocation(ctx, PROJECT_FILES_STAGE, &invocation)
    }
}

/// Extracts the data of the default value from `reg query ... /ve` output.
pub fn parse_registry_value(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line
            .split_once("REG_EXPAND_SZ")
            .or_else(|| line.split_once("REG_SZ"))?;
        let value = rest.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Splits a Windows command line into arguments. Double quotes group whitespace and are
/// dropped from the result.
pub fn split_command_line(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_token = false;

    for ch in command.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    parts.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        parts.push(current);
    }
    parts
}

/// Splits `template` and substitutes `%1` with the project file.
pub fn expand_command(template: &str, project_file: &Path) -> Vec<String> {
    let project = project_file.display().to_string();
    split_command_line(template)
        .into_iter()
        .map(|part| part.replace("%1", &project))
        .collect()
}

#[cfg(windows)]
fn query_registered_command() -> Option<String> {
    use std::process::Command;

    let output = Command::new("reg")
        .args(["query", GENERATOR_REGISTRY_KEY, "/ve"])
        .output()
        .map_err(|err| debug!(error = %err, "Failed to run reg"))
        .ok()?;
    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Generator is not registered"
        );
        return None;
    }
    parse_registry_value(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(windows))]
fn query_registered_command() -> Option<String> {
    None
}
