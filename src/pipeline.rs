use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::{ConfigValidator, PipelineConfig, RawParameters, RunMode};
use crate::error::{PipelineError, StageFailure};
use crate::layout::ArtifactLayout;
use crate::observability::MetricsCollector;
use crate::process::{ProcessLauncher, ToolInvocation};
use crate::stages;

pub const VALIDATE_STAGE: &str = "validate";

/// Everything a stage may look at while running. Stages never read process-wide state.
pub struct PipelineContext<'a> {
    pub config: &'a PipelineConfig,
    pub layout: &'a ArtifactLayout,
    pub launcher: &'a dyn ProcessLauncher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Clean,
    Fetch,
    Tool,
}

pub trait Stage {
    fn name(&self) -> &str;
    fn phase(&self) -> StagePhase;
    /// The external command this stage will run, when it is known before running.
    fn invocation(&self, _ctx: &PipelineContext<'_>) -> Option<ToolInvocation> {
        None
    }
    fn run(&self, ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl StageResult {
    pub fn succeeded(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            success: true,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn failed(stage: impl Into<String>, error: &PipelineError) -> Self {
        Self {
            stage: stage.into(),
            success: false,
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Cleaning,
    Fetching,
    Running(usize),
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Validating => f.write_str("validating"),
            RunState::Cleaning => f.write_str("cleaning"),
            RunState::Fetching => f.write_str("fetching"),
            RunState::Running(index) => write!(f, "running[{index}]"),
            RunState::Succeeded => f.write_str("succeeded"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome of one pipeline run: every state visited, the result of each stage that
/// ran, and the failure that stopped the run, if any.
#[derive(Debug)]
pub struct PipelineReport {
    pub transitions: Vec<RunState>,
    pub results: Vec<StageResult>,
    pub failure: Option<StageFailure>,
}

impl PipelineReport {
    fn starting() -> Self {
        Self {
            transitions: vec![RunState::Idle, RunState::Validating],
            results: Vec::new(),
            failure: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        tracing::debug!(%state, "Pipeline state");
        self.transitions.push(state);
    }

    fn fail(&mut self, failure: StageFailure) {
        self.results
            .push(StageResult::failed(failure.stage.clone(), &failure.source));
        self.failure = Some(failure);
        self.enter(RunState::Failed);
    }

    pub fn state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.state() == RunState::Succeeded
    }

    pub fn into_result(self) -> Result<Vec<StageResult>, StageFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.results),
        }
    }
}

/// Runs stages strictly in order and stops at the first failure.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
    metrics: MetricsCollector,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn execute(&self, ctx: &PipelineContext<'_>) -> PipelineReport {
        let mut report = PipelineReport::starting();
        self.execute_into(ctx, &mut report);
        report
    }

    fn execute_into(&self, ctx: &PipelineContext<'_>, report: &mut PipelineReport) {
        self.metrics.reset();
        let started = Instant::now();
        let mut tool_index = 0usize;

        for stage in &self.stages {
            let state = match stage.phase() {
                StagePhase::Clean => RunState::Cleaning,
                StagePhase::Fetch => RunState::Fetching,
                StagePhase::Tool => {
                    let state = RunState::Running(tool_index);
                    tool_index += 1;
                    state
                }
            };
            report.enter(state);

            let span = tracing::span!(tracing::Level::INFO, "stage", stage = stage.name());
            let _span_guard = span.enter();
            let mut timer = self.metrics.start_stage(stage.name());

            match stage.run(ctx) {
                Ok(result) => {
                    timer.set_exit_code(result.exit_code);
                    info!(detail = result.message.as_str(), "Stage completed");
                    report.results.push(result);
                }
                Err(err) => {
                    timer.set_exit_code(err.exit_code());
                    timer.mark_failed();
                    error!(error = %err, "Stage failed");
                    report.fail(StageFailure::new(stage.name(), err));
                    break;
                }
            }
        }

        self.metrics.record_total_duration(started.elapsed());
        if report.failure.is_none() {
            report.enter(RunState::Succeeded);
        }
    }
}

/// A validated configuration together with its derived layout and stage list.
pub struct PreparedPipeline {
    pub config: PipelineConfig,
    pub layout: ArtifactLayout,
    pub executor: PipelineExecutor,
}

impl PreparedPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let layout = ArtifactLayout::new(&config);
        let executor = PipelineExecutor::new(stages::build_stages(&config, &layout));
        Self {
            config,
            layout,
            executor,
        }
    }

    /// Validates `raw` for `mode` and builds the stage list. Nothing is written to disk.
    pub fn prepare(
        validator: &ConfigValidator,
        mode: RunMode,
        raw: &RawParameters,
        generate_project_files: bool,
    ) -> Result<Self, StageFailure> {
        validator
            .validate(mode, raw, generate_project_files)
            .map(Self::new)
            .map_err(|err| StageFailure::new(VALIDATE_STAGE, err))
    }

    pub fn context<'a>(&'a self, launcher: &'a dyn ProcessLauncher) -> PipelineContext<'a> {
        PipelineContext {
            config: &self.config,
            layout: &self.layout,
            launcher,
        }
    }

    /// Planned stages with the command each one runs, in execution order.
    pub fn plan(&self, launcher: &dyn ProcessLauncher) -> Vec<(String, Option<ToolInvocation>)> {
        let ctx = self.context(launcher);
        self.executor
            .stages()
            .iter()
            .map(|stage| (stage.name().to_string(), stage.invocation(&ctx)))
            .collect()
    }

    #[instrument(skip_all, fields(mode = %self.config.mode(), project = %self.config.project_name))]
    pub fn execute(&self, launcher: &dyn ProcessLauncher) -> PipelineReport {
        self.executor.execute(&self.context(launcher))
    }
}

/// Validate, clean, fetch and run tools. Validation failures are reported as a failed
/// `validate` stage; nothing on disk is touched before validation succeeds.
pub fn run_pipeline(
    validator: &ConfigValidator,
    mode: RunMode,
    raw: &RawParameters,
    generate_project_files: bool,
    launcher: &dyn ProcessLauncher,
) -> PipelineReport {
    match PreparedPipeline::prepare(validator, mode, raw, generate_project_files) {
        Ok(prepared) => prepared.execute(launcher),
        Err(failure) => {
            error!(error = %failure, "Configuration rejected");
            let mut report = PipelineReport::starting();
            report.fail(failure);
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeSettings;
    use crate::process::ProcessOutput;
    use std::cell::RefCell;
    use std::io;
    use std::path::PathBuf;

    struct NoopLauncher;

    impl ProcessLauncher for NoopLauncher {
        fn launch(&self, _invocation: &ToolInvocation) -> io::Result<ProcessOutput> {
            Ok(ProcessOutput::exited(0))
        }
    }

    struct FakeStage {
        name: &'static str,
        phase: StagePhase,
        fail: bool,
        calls: RefCell<u32>,
    }

    impl FakeStage {
        fn boxed(name: &'static str, phase: StagePhase, fail: bool) -> Box<dyn Stage> {
            Box::new(Self {
                name,
                phase,
                fail,
                calls: RefCell::new(0),
            })
        }
    }

    impl Stage for FakeStage {
        fn name(&self) -> &str {
            self.name
        }

        fn phase(&self) -> StagePhase {
            self.phase
        }

        fn run(&self, _ctx: &PipelineContext<'_>) -> Result<StageResult, PipelineError> {
            *self.calls.borrow_mut() += 1;
            if self.fail {
                return Err(PipelineError::ToolInvocation {
                    tool: self.name.to_string(),
                    exit_code: Some(1),
                    stderr: "boom".into(),
                });
            }
            Ok(StageResult::succeeded(self.name, "ok").with_exit_code(Some(0)))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            engine_path: PathBuf::from("/engine"),
            project_path: PathBuf::from("/project"),
            project_name: "Demo".into(),
            repo_url: "https://example.com/plugin.git".into(),
            branch: "develop".into(),
            plugin_name: "Xsolla".into(),
            generator: None,
            settings: ModeSettings::Test {
                autotests_artifact: PathBuf::from("/reports/run"),
                test_filter: "Xsolla".into(),
            },
        }
    }

    #[test]
    fn states_follow_stage_phases() {
        let config = config();
        let layout = ArtifactLayout::new(&config);
        let ctx = PipelineContext {
            config: &config,
            layout: &layout,
            launcher: &NoopLauncher,
        };
        let executor = PipelineExecutor::new(vec![
            FakeStage::boxed("clean", StagePhase::Clean, false),
            FakeStage::boxed("fetch", StagePhase::Fetch, false),
            FakeStage::boxed("a", StagePhase::Tool, false),
            FakeStage::boxed("b", StagePhase::Tool, false),
        ]);

        let report = executor.execute(&ctx);

        assert!(report.succeeded());
        assert_eq!(
            report.transitions,
            vec![
                RunState::Idle,
                RunState::Validating,
                RunState::Cleaning,
                RunState::Fetching,
                RunState::Running(0),
                RunState::Running(1),
                RunState::Succeeded,
            ]
        );
        assert_eq!(report.results.len(), 4);
        let snapshot = executor.metrics().snapshot();
        assert_eq!(snapshot.stages["b"].calls, 1);
        assert_eq!(snapshot.stages["b"].last_exit_code, Some(0));
    }

    #[test]
    fn first_failure_stops_the_run() {
        let config = config();
        let layout = ArtifactLayout::new(&config);
        let ctx = PipelineContext {
            config: &config,
            layout: &layout,
            launcher: &NoopLauncher,
        };
        let executor = PipelineExecutor::new(vec![
            FakeStage::boxed("clean", StagePhase::Clean, true),
            FakeStage::boxed("fetch", StagePhase::Fetch, false),
        ]);

        let report = executor.execute(&ctx);

        assert_eq!(report.state(), RunState::Failed);
        assert!(report.state().is_terminal());
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].success);
        assert_eq!(report.results[0].exit_code, Some(1));
        let failure = report.into_result().unwrap_err();
        assert_eq!(failure.stage, "clean");
        assert_eq!(executor.metrics().snapshot().failed_stages, 1);
        assert!(!executor.metrics().snapshot().stages.contains_key("fetch"));
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::Running(2).to_string(), "running[2]");
        assert_eq!(RunState::Failed.to_string(), "failed");
    }
}
