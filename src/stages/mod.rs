mod fetch;
mod project_files;
mod tools;

use crate::config::{ModeSettings, PipelineConfig};
use crate::error::PipelineError;
use crate::layout::{ArtifactLayout, inspect_dir, inspect_report, package_dir};
use crate::pipeline::{PipelineContext, Stage, StagePhase, StageResult};
use crate::process::ToolInvocation;
use crate::workspace::clean_workspace;

pub use fetch::{FetchStage, GIT};
pub use project_files::{
    GENERATOR_REGISTRY_KEY, ProjectFilesStage, expand_command, parse_registry_value,
    split_command_line,
};
pub use tools::ToolStage;

pub const CLEAN_STAGE: &str = "clean";

/// Ordered stage list for a validated configuration: clean, fetch, then the tool runs of
/// the configured mode.
pub fn build_stages(config: &PipelineConfig, layout: &ArtifactLayout) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(CleanStage), Box::new(FetchStage)];
    let project_root = config.project_path.clone();
    let project_arg = format!("-project={}", layout.project_file.display());

    match &config.settings {
        ModeSettings::Package {
            platforms,
            generate_project_files,
            build_output,
        } => {
            for platform in platforms {
                let archive_dir = package_dir(build_output, platform);
                let invocation = ToolInvocation::new("AutomationTool", &layout.automation_tool)
                    .arg("BuildCookRun")
                    .arg("-utf8output")
                    .arg(format!("-platform={platform}"))
                    .arg(project_arg.clone())
                    .args(["-noP4", "-cook", "-build", "-stage", "-prereqs"])
                    .arg(format!("-archivedirectory={}", archive_dir.display()))
                    .arg("-archive")
                    .current_dir(&project_root);
                stages.push(Box::new(
                    ToolStage::new(format!("package:{platform}"), "automation tool", invocation)
                        .recreating(archive_dir),
                ));
            }
            if *generate_project_files {
                stages.push(Box::new(ProjectFilesStage));
            }
        }
        ModeSettings::Test {
            autotests_artifact,
            test_filter,
        } => {
            let build_project_arg = format!("-Project={}", layout.project_file.display());
            let query = ToolInvocation::new("UnrealBuildTool", &layout.build_tool)
                .arg("-Mode=QueryTargets")
                .arg(build_project_arg.clone())
                .arg(format!("-Output={}", layout.target_info.display()))
                .current_dir(&project_root);
            let mut query_stage = ToolStage::new("query-targets", "build tool", query);
            if let Some(parent) = layout.target_info.parent() {
                query_stage = query_stage.ensuring(parent);
            }
            stages.push(Box::new(query_stage));

            let build = ToolInvocation::new("UnrealBuildTool", &layout.build_tool)
                .args(["Development", "Win64", "-TargetType=Editor", "-Progress"])
                .arg("-NoEngineChanges")
                .arg(build_project_arg)
                .arg("-NoHotReloadFromIDE")
                .current_dir(&project_root);
            stages.push(Box::new(ToolStage::new("build-editor", "build tool", build)));

            let tests = ToolInvocation::new("UE4Editor", &layout.editor)
                .arg(layout.project_file.display().to_string())
                .arg(format!("-ExecCmds=Automation RunTests {test_filter}"))
                .args(["-nullRHI", "-nopause", "-unattended"])
                .arg("-testexit=Automation Test Queue Empty")
                .arg(format!("-ReportOutputPath={}", autotests_artifact.display()))
                .current_dir(&project_root);
            stages.push(Box::new(
                ToolStage::new("automation-tests", "editor", tests)
                    .ensuring(autotests_artifact),
            ));
        }
        ModeSettings::Inspect {
            inspector,
            artifact_root,
        } => {
            stages.push(Box::new(ProjectFilesStage));
            let inspect = ToolInvocation::new("InspectCode", inspector)
                .arg(layout.solution_file.display().to_string())
                .arg(format!("--output={}", inspect_report(artifact_root).display()))
                .current_dir(&project_root);
            stages.push(Box::new(
                ToolStage::new("inspect", "static analyzer", inspect)
                    .recreating(inspect_dir(artifact_root)),
            ));
        }
    }

    stages
}

/// Removes stale build state from the project tree.
pub struct CleanStage;

impl Stage for CleanStage {
    fn name(&self) -> &str {
        CLEAN_STAGE
    }

    fn phase(&self) -> StagePhase {
        StagePhase::Clean
    }

    fn run(&self, ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError> {
        let removed = clean_workspace(&ctx.config.project_path)?;
        Ok(StageResult::succeeded(
            CLEAN_STAGE,
            format!("Removed {} temporary directories", removed.len()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessLauncher, ProcessOutput};
    use std::io;
    use std::path::PathBuf;

    struct NoopLauncher;

    impl ProcessLauncher for NoopLauncher {
        fn launch(&self, _invocation: &ToolInvocation) -> io::Result<ProcessOutput> {
            Ok(ProcessOutput::exited(0))
        }
    }

    fn planned(config: &PipelineConfig) -> Vec<Option<ToolInvocation>> {
        let layout = ArtifactLayout::new(config);
        let ctx = PipelineContext {
            config,
            layout: &layout,
            launcher: &NoopLauncher,
        };
        build_stages(config, &layout)
            .iter()
            .map(|stage| stage.invocation(&ctx))
            .collect()
    }

    fn config(settings: ModeSettings) -> PipelineConfig {
        PipelineConfig {
            engine_path: PathBuf::from("/engine"),
            project_path: PathBuf::from("/work/Demo"),
            project_name: "Demo".into(),
            repo_url: "https://example.com/plugin.git".into(),
            branch: "develop".into(),
            plugin_name: "Xsolla".into(),
            generator: None,
            settings,
        }
    }

    fn names(stages: &[Box<dyn Stage>]) -> Vec<&str> {
        stages.iter().map(|s| s.name()).collect()
    }

    #[test]
    fn package_mode_runs_one_stage_per_platform() {
        let config = config(ModeSettings::Package {
            build_output: PathBuf::from("/out"),
            platforms: vec!["Win64".into(), "Android".into()],
            generate_project_files: true,
        });
        let layout = ArtifactLayout::new(&config);
        let stages = build_stages(&config, &layout);
        assert_eq!(
            names(&stages),
            vec![
                "clean",
                "fetch",
                "package:Win64",
                "package:Android",
                "generate-project-files"
            ]
        );
        assert_eq!(stages[2].phase(), StagePhase::Tool);
    }

    #[test]
    fn test_mode_builds_editor_before_running_tests() {
        let config = config(ModeSettings::Test {
            autotests_artifact: PathBuf::from("/reports/autotests"),
            test_filter: "Xsolla".into(),
        });
        let layout = ArtifactLayout::new(&config);
        assert_eq!(
            names(&build_stages(&config, &layout)),
            vec![
                "clean",
                "fetch",
                "query-targets",
                "build-editor",
                "automation-tests"
            ]
        );
    }

    #[test]
    fn inspect_mode_generates_project_files_first() {
        let config = config(ModeSettings::Inspect {
            inspector: PathBuf::from("/tools/inspectcode.exe"),
            artifact_root: PathBuf::from("/artifacts"),
        });
        let layout = ArtifactLayout::new(&config);
        assert_eq!(
            names(&build_stages(&config, &layout)),
            vec!["clean", "fetch", "generate-project-files", "inspect"]
        );
    }

    #[test]
    fn mode_stages_write_under_the_configured_roots() {
        let package = planned(&config(ModeSettings::Package {
            build_output: PathBuf::from("/out"),
            platforms: vec!["Linux".into()],
            generate_project_files: false,
        }));
        assert_eq!(package.len(), 3);
        let archive = package[2].as_ref().unwrap();
        assert!(archive.has_arg(&format!(
            "-archivedirectory={}",
            PathBuf::from("/out/Packages/Linux").display()
        )));

        let inspect = planned(&config(ModeSettings::Inspect {
            inspector: PathBuf::from("/tools/inspectcode.exe"),
            artifact_root: PathBuf::from("/artifacts"),
        }));
        let analyzer = inspect[3].as_ref().unwrap();
        assert_eq!(analyzer.program, PathBuf::from("/tools/inspectcode.exe"));
        assert!(analyzer.has_arg(&format!(
            "--output={}",
            PathBuf::from("/artifacts/Inspect/InspectResult.xml").display()
        )));
    }
}
