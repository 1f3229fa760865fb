use std::path::PathBuf;

use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StagePhase, StageResult};
use crate::process::{ToolInvocation, is_explicit_path};
use crate::workspace::{ensure_dir, recreate_dir};

/// One synchronous run of an external tool. Output directories are prepared right
/// before the launch, and any exit code other than zero fails the stage.
pub struct ToolStage {
    name: String,
    what: &'static str,
    invocation: ToolInvocation,
    recreate: Vec<PathBuf>,
    ensure: Vec<PathBuf>,
}

impl ToolStage {
    pub fn new(name: impl Into<String>, what: &'static str, invocation: ToolInvocation) -> Self {
        Self {
            name: name.into(),
            what,
            invocation,
            recreate: Vec::new(),
            ensure: Vec::new(),
        }
    }

    /// Directory wiped and created fresh before the tool runs.
    pub fn recreating(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recreate.push(dir.into());
        self
    }

    /// Directory created before the tool runs, keeping existing contents.
    pub fn ensuring(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ensure.push(dir.into());
        self
    }
}

impl Stage for ToolStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> StagePhase {
        StagePhase::Tool
    }

    fn invocation(&self, _ctx: &PipelineContext<'_>) -> Option<ToolInvocation> {
        Some(self.invocation.clone())
    }

    fn run(&self, ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError> {
        let program = &self.invocation.program;
        if is_explicit_path(program) && !program.is_file() {
            return Err(PipelineError::path_not_found(self.what, program.clone()));
        }

        for dir in &self.recreate {
            recreate_dir(dir)?;
        }
        for dir in &self.ensure {
            ensure_dir(dir)?;
        }

        run_invocation(ctx, &self.name, &self.invocation)
    }
}

pub(crate) fn run_invocation(
    ctx: &PipelineContext<'_>,
    stage: &str,
    invocation: &ToolInvocation,
) -> Result<StageResult, PipelineError> {
    info!(command = %invocation, "Running {}", invocation.label);
    let output = ctx
        .launcher
        .launch(invocation)
        .map_err(|source| PipelineError::Launch {
            program: invocation.program.clone(),
            source,
        })?;

    if !output.success() {
        return Err(PipelineError::ToolInvocation {
            tool: invocation.label.clone(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    Ok(
        StageResult::succeeded(stage, format!("{} completed", invocation.label))
            .with_exit_code(output.exit_code),
    )
}
