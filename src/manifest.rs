use std::fs::File;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{ModeSettings, PipelineConfig, RunMode};
use crate::layout::{ArtifactLayout, inspect_report, package_dir};
use crate::pipeline::StageResult;
use crate::process::ToolInvocation;
use crate::stages::GIT;

/// Record of a finished run: what was fetched, what ran and what it produced.
#[derive(Debug, Serialize)]
pub struct RunManifest {
    pub generated_at: DateTime<Utc>,
    pub mode: RunMode,
    pub project_file: String,
    pub plugin: PluginSource,
    pub commands_sha256: String,
    pub stages: Vec<StageResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PluginSource {
    pub repository: String,
    pub branch: String,
    pub directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PackageEntry {
    pub platform: String,
    pub archive_directory: String,
    pub files: usize,
    pub bytes: u64,
}

pub fn build_manifest<'a>(
    config: &PipelineConfig,
    layout: &ArtifactLayout,
    commands: impl IntoIterator<Item = &'a ToolInvocation>,
    stages: &[StageResult],
) -> Result<RunManifest> {
    let mut packages = Vec::new();
    let mut report = None;
    match &config.settings {
        ModeSettings::Package {
            platforms,
            build_output,
            ..
        } => {
            for platform in platforms {
                packages.push(collect_package(platform, &package_dir(build_output, platform))?);
            }
        }
        ModeSettings::Test {
            autotests_artifact, ..
        } => report = Some(autotests_artifact.display().to_string()),
        ModeSettings::Inspect { artifact_root, .. } => {
            report = Some(inspect_report(artifact_root).display().to_string())
        }
    }

    Ok(RunManifest {
        generated_at: Utc::now(),
        mode: config.mode(),
        project_file: layout.project_file.display().to_string(),
        plugin: PluginSource {
            repository: config.repo_url.clone(),
            branch: config.branch.clone(),
            directory: layout.plugin_dir.display().to_string(),
            commit: head_commit(&layout.plugin_dir),
        },
        commands_sha256: fingerprint(commands),
        stages: stages.to_vec(),
        packages,
        report,
    })
}

/// SHA-256 over the rendered command lines, in order.
pub fn fingerprint<'a>(commands: impl IntoIterator<Item = &'a ToolInvocation>) -> String {
    let mut hasher = Sha256::new();
    for command in commands {
        hasher.update(command.command_line().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Counts the files archived for `platform` below `dir`.
pub fn collect_package(platform: &str, dir: &Path) -> Result<PackageEntry> {
    let pattern = format!(
        "{}/**/*",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut files = 0usize;
    let mut bytes = 0u64;
    for entry in glob(&pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))? {
        let path = entry?;
        if path.is_file() {
            files += 1;
            bytes += path
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .len();
        }
    }
    Ok(PackageEntry {
        platform: platform.to_string(),
        archive_directory: dir.display().to_string(),
        files,
        bytes,
    })
}

fn head_commit(repo_dir: &Path) -> Option<String> {
    let output = Command::new(GIT)
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "No commit recorded"
        );
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

/// Writes `manifest` as JSON when `path` ends in `.json`, YAML otherwise.
pub fn write_manifest(manifest: &RunManifest, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create manifest: {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::to_writer_pretty(file, manifest)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    } else {
        serde_yaml::to_writer(file, manifest)
            .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    }
    Ok(())
}
