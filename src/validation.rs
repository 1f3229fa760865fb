use std::process::Command;

use serde::Serialize;

use crate::config::{ConfigValidator, ModeSettings, PipelineConfig, RawParameters, RunMode};
use crate::error::ConfigError;
use crate::layout::ArtifactLayout;
use crate::stages::GIT;

/// Findings of a dry configuration check. Unlike a run, which stops at the first
/// problem, the check collects everything it can find.
#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks `raw` for `mode` without modifying anything on disk.
pub fn check_configuration(
    validator: &ConfigValidator,
    mode: RunMode,
    raw: &RawParameters,
    generate_project_files: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let missing = validator.missing_fields(mode, raw);
    if !missing.is_empty() {
        report.errors.extend(
            missing
                .into_iter()
                .map(|field| ConfigError::Missing { field }.to_string()),
        );
        if let Err(err) = validator.check_host() {
            report.errors.push(err.to_string());
        }
        return report;
    }

    match validator.validate(mode, raw, generate_project_files) {
        Ok(config) => report.merge(check_environment(&config, &ArtifactLayout::new(&config))),
        Err(err) => report.errors.push(err.to_string()),
    }
    report
}

/// Engine tools the configured mode will launch, plus leftovers the run will discard.
pub fn check_environment(config: &PipelineConfig, layout: &ArtifactLayout) -> ValidationReport {
    let mut report = ValidationReport::default();

    let tools = match &config.settings {
        ModeSettings::Package { .. } => vec![("automation tool", &layout.automation_tool)],
        ModeSettings::Test { .. } => vec![
            ("build tool", &layout.build_tool),
            ("editor", &layout.editor),
        ],
        ModeSettings::Inspect { .. } => Vec::new(),
    };
    for (what, path) in tools {
        if !path.is_file() {
            report
                .errors
                .push(format!("{what} not found at {}", path.display()));
        }
    }

    if layout.plugin_dir.exists() {
        report.warnings.push(format!(
            "{} exists and will be removed before fetching",
            layout.plugin_dir.display()
        ));
    }
    if let ModeSettings::Package { build_output, .. } = &config.settings
        && !build_output.exists()
    {
        report
            .warnings
            .push(format!("{} will be created", build_output.display()));
    }
    report
}

/// Whether `git` can be started from `PATH`.
pub fn check_git() -> ValidationReport {
    let mut report = ValidationReport::default();
    match Command::new(GIT).arg("--version").output() {
        Ok(output) if output.status.success() => {}
        Ok(output) => report.errors.push(format!(
            "{GIT} --version failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(err) => report.errors.push(format!("{GIT} is not available: {err}")),
    }
    report
}
