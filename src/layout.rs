use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;

pub const PLUGINS_DIR: &str = "Plugins";
pub const PACKAGES_DIR: &str = "Packages";
pub const INSPECT_DIR: &str = "Inspect";
pub const INSPECT_REPORT: &str = "InspectResult.xml";

const AUTOMATION_TOOL: &str = "Engine/Binaries/DotNET/AutomationTool.exe";
const BUILD_TOOL: &str = "Engine/Binaries/DotNET/UnrealBuildTool.exe";
const EDITOR: &str = "Engine/Binaries/Win64/UE4Editor.exe";

/// Paths derived from a validated [`PipelineConfig`]. Nothing here touches the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub project_file: PathBuf,
    pub solution_file: PathBuf,
    pub plugin_dir: PathBuf,
    pub target_info: PathBuf,
    pub automation_tool: PathBuf,
    pub build_tool: PathBuf,
    pub editor: PathBuf,
}

impl ArtifactLayout {
    pub fn new(config: &PipelineConfig) -> Self {
        let project = &config.project_path;
        let engine = &config.engine_path;

        Self {
            project_file: config.project_file(),
            solution_file: project.join(format!("{}.sln", config.project_name)),
            plugin_dir: project.join(PLUGINS_DIR).join(&config.plugin_name),
            target_info: project.join("Intermediate").join("TargetInfo.json"),
            automation_tool: engine.join(AUTOMATION_TOOL),
            build_tool: engine.join(BUILD_TOOL),
            editor: engine.join(EDITOR),
        }
    }

    pub fn project_root(&self) -> &Path {
        self.project_file.parent().unwrap_or(Path::new("."))
    }
}

/// Archive directory of one packaged target: `<build_output>/Packages/<platform>`.
pub fn package_dir(build_output: &Path, platform: &str) -> PathBuf {
    build_output.join(PACKAGES_DIR).join(platform)
}

pub fn inspect_dir(artifact_root: &Path) -> PathBuf {
    artifact_root.join(INSPECT_DIR)
}

pub fn inspect_report(artifact_root: &Path) -> PathBuf {
    inspect_dir(artifact_root).join(INSPECT_REPORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeSettings;

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

    #[test]
    fn package_layout_has_one_archive_dir_per_platform() {
        let layout = ArtifactLayout::new(&config(ModeSettings::Package {
            build_output: PathBuf::from("/out"),
            platforms: vec!["Win64".into()],
            generate_project_files: false,
        }));
        assert_eq!(
            package_dir(Path::new("/out"), "Win64"),
            PathBuf::from("/out/Packages/Win64")
        );
        assert_eq!(layout.plugin_dir, PathBuf::from("/work/Demo/Plugins/Xsolla"));
        assert_eq!(layout.project_file, PathBuf::from("/work/Demo/Demo.uproject"));
        assert_eq!(layout.project_root(), Path::new("/work/Demo"));
    }

    #[test]
    fn inspect_layout_points_at_report() {
        let layout = ArtifactLayout::new(&config(ModeSettings::Inspect {
            inspector: PathBuf::from("/tools/inspectcode.exe"),
            artifact_root: PathBuf::from("/artifacts"),
        }));
        assert_eq!(
            inspect_report(Path::new("/artifacts")),
            PathBuf::from("/artifacts/Inspect/InspectResult.xml")
        );
        assert_eq!(layout.solution_file, PathBuf::from("/work/Demo/Demo.sln"));
        assert!(layout.automation_tool.ends_with("AutomationTool.exe"));
    }
}
