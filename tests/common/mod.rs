#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use demo_pipeline::config::{ConfigValidator, HostPlatform, RawParameters};
use demo_pipeline::process::{ProcessLauncher, ProcessOutput, ToolInvocation};
use tempfile::TempDir;

type Rule = Box<dyn Fn(&ToolInvocation) -> Option<ProcessOutput>>;

/// Records every launch instead of spawning. A successful `git clone` creates its
/// destination and `BuildCookRun` drops a pak file into its archive directory.
#[derive(Default)]
pub struct ScriptedLauncher {
    pub launched: RefCell<Vec<ToolInvocation>>,
    rules: Vec<Rule>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes matching invocations exit with `code` and `stderr`.
    pub fn failing_when(
        mut self,
        matches: impl Fn(&ToolInvocation) -> bool + 'static,
        code: i32,
        stderr: &str,
    ) -> Self {
        let stderr = stderr.to_string();
        self.rules.push(Box::new(move |invocation| {
            matches(invocation).then(|| ProcessOutput {
                exit_code: Some(code),
                stderr: stderr.clone(),
            })
        }));
        self
    }

    pub fn labels(&self) -> Vec<String> {
        self.launched
            .borrow()
            .iter()
            .map(|invocation| invocation.label.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.launched.borrow().len()
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&self, invocation: &ToolInvocation) -> io::Result<ProcessOutput> {
        self.launched.borrow_mut().push(invocation.clone());
        if let Some(output) = self.rules.iter().find_map(|rule| rule(invocation)) {
            return Ok(output);
        }

        if invocation.args.first().map(String::as_str) == Some("clone")
            && let Some(destination) = invocation.args.last()
        {
            fs::create_dir_all(Path::new(destination).join("Source"))?;
        }
        if invocation.has_arg("BuildCookRun")
            && let Some(dir) = invocation
                .args
                .iter()
                .find_map(|arg| arg.strip_prefix("-archivedirectory="))
        {
            fs::write(Path::new(dir).join("Demo.pak"), b"pak")?;
        }
        Ok(ProcessOutput::exited(0))
    }
}

pub const PROJECT_NAME: &str = "Demo";
pub const REPO_URL: &str = "https://example.com/store-sdk-unreal.git";

/// Engine install and demo project laid out in a scratch directory.
pub struct Fixture {
    pub temp: TempDir,
    pub engine: PathBuf,
    pub project: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let engine = temp.path().join("UE_4.27");
        let project = temp.path().join("DemoProject");

        for tool in [
            "Engine/Binaries/DotNET/AutomationTool.exe",
            "Engine/Binaries/DotNET/UnrealBuildTool.exe",
            "Engine/Binaries/Win64/UE4Editor.exe",
        ] {
            let path = engine.join(tool);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }

        fs::create_dir_all(project.join("Content")).unwrap();
        fs::write(project.join("Content/Map.umap"), "map").unwrap();
        fs::write(project.join(format!("{PROJECT_NAME}.uproject")), "{}").unwrap();
        for stale in [
            "Binaries/Win64/Demo.dll",
            "Intermediate/Build/Makefile.bin",
            "Saved/Logs/Demo.log",
            "Plugins/Xsolla/Xsolla.uplugin",
        ] {
            let path = project.join(stale);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "stale").unwrap();
        }

        Self {
            temp,
            engine,
            project,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn output(&self) -> PathBuf {
        self.root().join("build")
    }

    pub fn common(&self) -> RawParameters {
        RawParameters {
            engine_path: Some(self.engine.clone()),
            project_path: Some(self.project.clone()),
            project_name: Some(PROJECT_NAME.into()),
            repo_url: Some(REPO_URL.into()),
            ..Default::default()
        }
    }

    pub fn package(&self) -> RawParameters {
        RawParameters {
            build_output: Some(self.output()),
            ..self.common()
        }
    }

    /// Leftovers of a previous run that the cleaner must remove.
    pub fn stale_dirs_present(&self) -> bool {
        ["Binaries", "Intermediate", "Saved"]
            .iter()
            .all(|dir| self.project.join(dir).exists())
    }
}

pub fn windows_validator() -> ConfigValidator {
    ConfigValidator::for_host(HostPlatform::Windows)
}
