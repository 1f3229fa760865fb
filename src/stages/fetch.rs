use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::{PipelineContext, Stage, StagePhase, StageResult};
use crate::process::ToolInvocation;
use crate::workspace::ensure_dir;

pub const GIT: &str = "git";

const FETCH_STAGE: &str = "fetch";

/// Clones the configured branch of the plugin repository into `Plugins/<plugin>`.
pub struct FetchStage;

impl FetchStage {
    fn command(ctx: &PipelineContext<'_>) -> ToolInvocation {
        ToolInvocation::new("git clone", GIT)
            .args(["clone", "--progress", "--branch"])
            .arg(ctx.config.branch.clone())
            .arg(ctx.config.repo_url.clone())
            .arg(ctx.layout.plugin_dir.display().to_string())
            .current_dir(&ctx.config.project_path)
    }

    fn failure(ctx: &PipelineContext<'_>, reason: impl Into<String>) -> PipelineError {
        PipelineError::Fetch {
            url: ctx.config.repo_url.clone(),
            branch: ctx.config.branch.clone(),
            reason: reason.into(),
        }
    }
}

impl Stage for FetchStage {
    fn name(&self) -> &str {
        FETCH_STAGE
    }

    fn phase(&self) -> StagePhase {
        StagePhase::Fetch
    }

    fn invocation(&self, ctx: &PipelineContext<'_>) -> Option<ToolInvocation> {
        Some(Self::command(ctx))
    }

    fn run(&self, ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError> {
        let destination = &ctx.layout.plugin_dir;
        if destination.exists() {
            return Err(Self::failure(
                ctx,
                format!("destination {} already exists", destination.display()),
            ));
        }
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }

        let invocation = Self::command(ctx);
        info!(
            url = ctx.config.repo_url.as_str(),
            branch = ctx.config.branch.as_str(),
            destination = %destination.display(),
            "Cloning plugin"
        );
        let output = ctx
            .launcher
            .launch(&invocation)
            .map_err(|err| Self::failure(ctx, format!("could not start {GIT}: {err}")))?;

        if !output.success() {
            let stderr = output.stderr.trim();
            let reason = if !stderr.is_empty() {
                stderr.to_string()
            } else {
                match output.exit_code {
                    Some(code) => format!("{GIT} exited with status {code}"),
                    None => format!("{GIT} was terminated by a signal"),
                }
            };
            return Err(Self::failure(ctx, reason));
        }

        Ok(StageResult::succeeded(
            FETCH_STAGE,
            format!("Cloned {} into {}", ctx.config.branch, destination.display()),
        )
        .with_exit_code(output.exit_code))
    }
}
