use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, PipelineError};

pub const DEFAULT_PLUGIN_NAME: &str = "Xsolla";
pub const DEFAULT_TEST_FILTER: &str = "Xsolla";
pub const DEFAULT_PLATFORMS: &[&str] = &["Win64", "Android"];

/// Hosts the engine build tooling can be driven from.
pub const SUPPORTED_HOSTS: &[HostPlatform] = &[HostPlatform::Windows];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Cook, build, stage and archive the project for every target platform.
    Package,
    /// Build the editor target and run the automation test suite headless.
    Test,
    /// Generate IDE project files and run the static analyzer.
    Inspect,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Package => "package",
            RunMode::Test => "test",
            RunMode::Inspect => "inspect",
        }
    }

    /// Branch checked out when the caller does not name one.
    pub fn default_branch(&self) -> &'static str {
        match self {
            RunMode::Test => "qa/autotests",
            RunMode::Package | RunMode::Inspect => "develop",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Windows,
    Linux,
    Macos,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => HostPlatform::Windows,
            "linux" => HostPlatform::Linux,
            "macos" => HostPlatform::Macos,
            _ => HostPlatform::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostPlatform::Windows => "Windows",
            HostPlatform::Linux => "Linux",
            HostPlatform::Macos => "macOS",
            HostPlatform::Other => "this host platform",
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated parameters, merged from a profile file and command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspector: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autotests_artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
}

impl RawParameters {
    /// Overlay `overrides` on top of `self`; any value present in `overrides` wins.
    pub fn merge(self, overrides: RawParameters) -> RawParameters {
        RawParameters {
            engine_path: overrides.engine_path.or(self.engine_path),
            project_path: overrides.project_path.or(self.project_path),
            project_name: overrides.project_name.or(self.project_name),
            build_output: overrides.build_output.or(self.build_output),
            repo_url: overrides.repo_url.or(self.repo_url),
            branch: overrides.branch.or(self.branch),
            inspector: overrides.inspector.or(self.inspector),
            artifact_root: overrides.artifact_root.or(self.artifact_root),
            autotests_artifact: overrides.autotests_artifact.or(self.autotests_artifact),
            platforms: overrides.platforms.or(self.platforms),
            test_filter: overrides.test_filter.or(self.test_filter),
            generator: overrides.generator.or(self.generator),
            plugin_name: overrides.plugin_name.or(self.plugin_name),
        }
    }
}

/// Mode-specific part of a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSettings {
    Package {
        build_output: PathBuf,
        platforms: Vec<String>,
        generate_project_files: bool,
    },
    Test {
        autotests_artifact: PathBuf,
        test_filter: String,
    },
    Inspect {
        inspector: PathBuf,
        artifact_root: PathBuf,
    },
}

/// Validated, immutable inputs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub engine_path: PathBuf,
    pub project_path: PathBuf,
    pub project_name: String,
    pub repo_url: String,
    pub branch: String,
    pub plugin_name: String,
    pub generator: Option<PathBuf>,
    pub settings: ModeSettings,
}

impl PipelineConfig {
    pub fn mode(&self) -> RunMode {
        match self.settings {
            ModeSettings::Package { .. } => RunMode::Package,
            ModeSettings::Test { .. } => RunMode::Test,
            ModeSettings::Inspect { .. } => RunMode::Inspect,
        }
    }

    pub fn project_file(&self) -> PathBuf {
        self.project_path.join(format!("{}.uproject", self.project_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Required,
    Optional,
}

/// Parameters in the order they are checked. The first failing entry is reported.
const DECLARED: &[&str] = &[
    "engine_path",
    "project_path",
    "project_name",
    "build_output",
    "repo_url",
    "branch",
    "inspector",
    "artifact_root",
    "autotests_artifact",
];

fn requirement(mode: RunMode, field: &str) -> Option<Requirement> {
    match (field, mode) {
        ("engine_path" | "project_path" | "project_name" | "repo_url", _) => {
            Some(Requirement::Required)
        }
        ("branch", _) => Some(Requirement::Optional),
        ("build_output", RunMode::Package) => Some(Requirement::Required),
        ("inspector" | "artifact_root", RunMode::Inspect) => Some(Requirement::Required),
        ("autotests_artifact", RunMode::Test) => Some(Requirement::Required),
        _ => None,
    }
}

/// Fields a mode requires, in declaration order.
pub fn required_fields(mode: RunMode) -> Vec<&'static str> {
    DECLARED
        .iter()
        .copied()
        .filter(|field| requirement(mode, field) == Some(Requirement::Required))
        .collect()
}

/// Turns [`RawParameters`] into a [`PipelineConfig`] without touching the filesystem
/// beyond existence checks.
#[derive(Debug, Clone)]
pub struct ConfigValidator {
    host: HostPlatform,
    supported: &'static [HostPlatform],
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::for_host(HostPlatform::current())
    }

    pub fn for_host(host: HostPlatform) -> Self {
        Self {
            host,
            supported: SUPPORTED_HOSTS,
        }
    }

    pub fn host(&self) -> HostPlatform {
        self.host
    }

    pub fn check_host(&self) -> Result<(), PipelineError> {
        if self.supported.contains(&self.host) {
            return Ok(());
        }
        Err(PipelineError::UnsupportedPlatform {
            host: self.host.to_string(),
            supported: self
                .supported
                .iter()
                .map(HostPlatform::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Every missing or empty required parameter of `mode`, in declaration order.
    pub fn missing_fields(&self, mode: RunMode, raw: &RawParameters) -> Vec<&'static str> {
        required_fields(mode)
            .into_iter()
            .filter(|field| !is_present(raw, field))
            .collect()
    }

    /// Returns the first missing or empty required parameter of `mode`, if any.
    pub fn check_presence(
        &self,
        mode: RunMode,
        raw: &RawParameters,
    ) -> Result<(), ConfigError> {
        for field in required_fields(mode) {
            if !is_present(raw, field) {
                return Err(ConfigError::Missing { field });
            }
        }
        Ok(())
    }

    pub fn validate(
        &self,
        mode: RunMode,
        raw: &RawParameters,
        generate_project_files: bool,
    ) -> Result<PipelineConfig, PipelineError> {
        self.check_presence(mode, raw)?;
        self.check_host()?;

        let engine_path = existing_dir("engine_path", raw.engine_path.as_deref())?;
        let project_path = existing_dir("project_path", raw.project_path.as_deref())?;
        let project_name = non_empty("project_name", raw.project_name.as_deref())?;
        if project_name.contains(['/', '\\']) {
            return Err(
                ConfigError::invalid("project_name", "must not contain path separators").into(),
            );
        }
        let project_file = project_path.join(format!("{project_name}.uproject"));
        if !project_file.is_file() {
            return Err(PipelineError::path_not_found("project file", project_file));
        }

        let repo_url = non_empty("repo_url", raw.repo_url.as_deref())?;
        let branch = match raw.branch.as_deref().map(str::trim) {
            Some(branch) if !branch.is_empty() => branch.to_string(),
            _ => {
                let fallback = mode.default_branch();
                info!(branch = fallback, "No branch provided, using mode default");
                fallback.to_string()
            }
        };

        let plugin_name = match raw.plugin_name.as_deref() {
            Some(name) => {
                let name = non_empty("plugin_name", Some(name))?;
                if name.contains(['/', '\\']) || name == ".." {
                    return Err(
                        ConfigError::invalid("plugin_name", "must be a single directory name")
                            .into(),
                    );
                }
                name
            }
            None => DEFAULT_PLUGIN_NAME.to_string(),
        };

        let generator = match raw.generator.as_deref() {
            Some(path) => Some(existing_file("generator", path)?),
            None => None,
        };

        let settings = match mode {
            RunMode::Package => {
                let build_output = creatable_dir("build_output", raw.build_output.as_deref())?;
                let platforms = platforms(raw.platforms.as_deref())?;
                ModeSettings::Package {
                    build_output,
                    platforms,
                    generate_project_files,
                }
            }
            RunMode::Test => {
                let autotests_artifact =
                    creatable_dir("autotests_artifact", raw.autotests_artifact.as_deref())?;
                let test_filter = match raw.test_filter.as_deref() {
                    Some(filter) => non_empty("test_filter", Some(filter))?,
                    None => DEFAULT_TEST_FILTER.to_string(),
                };
                ModeSettings::Test {
                    autotests_artifact,
                    test_filter,
                }
            }
            RunMode::Inspect => {
                let inspector_path = required_path("inspector", raw.inspector.as_deref())?;
                let inspector = existing_file("inspector", inspector_path)?;
                let artifact_root =
                    creatable_dir("artifact_root", raw.artifact_root.as_deref())?;
                ModeSettings::Inspect {
                    inspector,
                    artifact_root,
                }
            }
        };

        let config = PipelineConfig {
            engine_path,
            project_path,
            project_name,
            repo_url,
            branch,
            plugin_name,
            generator,
            settings,
        };
        debug!(?config, "Configuration validated");
        Ok(config)
    }
}

fn is_present(raw: &RawParameters, field: &str) -> bool {
    fn path(value: &Option<PathBuf>) -> bool {
        value.as_ref().is_some_and(|p| !p.as_os_str().is_empty())
    }
    fn text(value: &Option<String>) -> bool {
        value.as_ref().is_some_and(|s| !s.trim().is_empty())
    }

    match field {
        "engine_path" => path(&raw.engine_path),
        "project_path" => path(&raw.project_path),
        "project_name" => text(&raw.project_name),
        "build_output" => path(&raw.build_output),
        "repo_url" => text(&raw.repo_url),
        "branch" => text(&raw.branch),
        "inspector" => path(&raw.inspector),
        "artifact_root" => path(&raw.artifact_root),
        "autotests_artifact" => path(&raw.autotests_artifact),
        _ => false,
    }
}

fn non_empty(field: &'static str, value: Option<&str>) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing { field }),
    }
}

fn required_path<'a>(
    field: &'static str,
    value: Option<&'a Path>,
) -> Result<&'a Path, ConfigError> {
    match value {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(ConfigError::Missing { field }),
    }
}

fn absolute(field: &'static str, path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|err| {
        ConfigError::invalid(field, format!("cannot resolve {}: {err}", path.display()))
    })
}

fn existing_dir(field: &'static str, value: Option<&Path>) -> Result<PathBuf, PipelineError> {
    let path = absolute(field, required_path(field, value)?)?;
    if !path.exists() {
        return Err(PipelineError::path_not_found(field, path));
    }
    if !path.is_dir() {
        return Err(not_a_directory(field, &path).into());
    }
    Ok(path)
}

fn existing_file(field: &'static str, value: &Path) -> Result<PathBuf, PipelineError> {
    let path = absolute(field, value)?;
    if !path.is_file() {
        return Err(PipelineError::path_not_found(field, path));
    }
    Ok(path)
}

/// An output directory: either an existing directory, or a path whose nearest
/// existing ancestor is a directory.
fn creatable_dir(field: &'static str, value: Option<&Path>) -> Result<PathBuf, PipelineError> {
    let path = absolute(field, required_path(field, value)?)?;
    if path.exists() {
        if !path.is_dir() {
            return Err(not_a_directory(field, &path).into());
        }
        return Ok(path);
    }
    ensure_creatable(field, &path)?;
    Ok(path)
}

fn not_a_directory(field: &'static str, path: &Path) -> ConfigError {
    ConfigError::invalid(field, format!("{} is not a directory", path.display()))
}

fn ensure_creatable(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    let ancestor = path
        .ancestors()
        .skip(1)
        .find(|candidate| candidate.exists());
    match ancestor {
        Some(dir) if dir.is_dir() => Ok(()),
        Some(other) => Err(ConfigError::invalid(
            field,
            format!("{} cannot be created below {}", path.display(), other.display()),
        )),
        None => Err(ConfigError::invalid(
            field,
            format!("{} has no existing parent directory", path.display()),
        )),
    }
}

fn platforms(value: Option<&[String]>) -> Result<Vec<String>, ConfigError> {
    let Some(list) = value else {
        return Ok(DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect());
    };
    if list.is_empty() {
        return Err(ConfigError::invalid(
            "platforms",
            "at least one target platform is required",
        ));
    }
    let mut platforms: Vec<String> = Vec::with_capacity(list.len());
    for entry in list {
        let name = entry.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("platforms", "platform names cannot be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid(
                "platforms",
                format!("'{name}' is not a valid platform identifier"),
            ));
        }
        if platforms.iter().any(|p| p == name) {
            return Err(ConfigError::invalid(
                "platforms",
                format!("'{name}' is listed twice"),
            ));
        }
        platforms.push(name.to_string());
    }
    Ok(platforms)
}
