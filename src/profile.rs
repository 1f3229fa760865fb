use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{DEFAULT_PLATFORMS, DEFAULT_TEST_FILTER, RawParameters, RunMode};

/// Reads a YAML profile. Keys match the long parameter names, e.g. `engine_path`.
pub fn load_profile(path: &Path) -> Result<RawParameters> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(RawParameters::default());
    }
    let raw: RawParameters = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse profile YAML: {}", path.display()))?;
    Ok(raw)
}

/// Writes a starter profile for `mode` listing every parameter the mode reads.
pub fn generate_profile(mode: RunMode, destination: &Path) -> Result<PathBuf> {
    let rendered = serde_yaml::to_string(&template(mode))?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write profile: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn template(mode: RunMode) -> RawParameters {
    let common = RawParameters {
        engine_path: Some(PathBuf::from("C:/Program Files/Epic Games/UE_4.27")),
        project_path: Some(PathBuf::from("C:/Work/DemoProject")),
        project_name: Some("DemoProject".into()),
        repo_url: Some("https://github.com/example/store-sdk-unreal.git".into()),
        branch: Some(mode.default_branch().into()),
        ..Default::default()
    };

    match mode {
        RunMode::Package => RawParameters {
            build_output: Some(PathBuf::from("C:/Builds/DemoProject")),
            platforms: Some(DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect()),
            ..common
        },
        RunMode::Test => RawParameters {
            autotests_artifact: Some(PathBuf::from("C:/Reports/autotests")),
            test_filter: Some(DEFAULT_TEST_FILTER.into()),
            ..common
        },
        RunMode::Inspect => RawParameters {
            inspector: Some(PathBuf::from("C:/Tools/ReSharper/inspectcode.exe")),
            artifact_root: Some(PathBuf::from("C:/Reports")),
            ..common
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::required_fields;
    use tempfile::tempdir;

    #[test]
    fn generated_profile_loads_back_with_required_fields() {
        let temp = tempdir().unwrap();
        for mode in [RunMode::Package, RunMode::Test, RunMode::Inspect] {
            let path = temp.path().join(format!("profiles/{mode}.yaml"));
            generate_profile(mode, &path).unwrap();
            let raw = load_profile(&path).unwrap();
            for field in required_fields(mode) {
                let text = serde_yaml::to_string(&raw).unwrap();
                assert!(text.contains(field), "{mode} template lacks {field}");
            }
            assert_eq!(raw.branch.as_deref(), Some(mode.default_branch()));
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bad.yaml");
        fs::write(&path, "engine_path: /ue\nue_base: /ue\n").unwrap();
        let err = load_profile(&path).unwrap_err();
        assert!(format!("{err:#}").contains("ue_base"));
    }

    #[test]
    fn empty_profile_is_default() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("empty.yaml");
        fs::write(&path, "\n").unwrap();
        assert_eq!(load_profile(&path).unwrap(), RawParameters::default());
    }
}
