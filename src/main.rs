use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use demo_pipeline::config::{ConfigValidator, RawParameters, RunMode};
use demo_pipeline::error::{ConfigError, PipelineError, StageFailure};
use demo_pipeline::manifest::{build_manifest, write_manifest};
use demo_pipeline::observability::{MetricsSnapshot, log_snapshot};
use demo_pipeline::pipeline::PreparedPipeline;
use demo_pipeline::process::SystemLauncher;
use demo_pipeline::profile::{generate_profile, load_profile};
use demo_pipeline::validation::{check_configuration, check_git};
use demo_pipeline::workspace::clean_workspace;
use serde_json::to_writer_pretty;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

/// Exit status when a required parameter is missing.
const USAGE_EXIT: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let subcommand = cli.command.name();
    let otlp_endpoint = cli.command.otlp_endpoint().map(str::to_string);

    if let Err(err) = configure_tracing(otlp_endpoint.as_deref()) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let outcome = dispatch(cli.command);

    #[cfg(feature = "otel")]
    if otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if is_missing_parameter(&err) {
                print_subcommand_help(subcommand);
                ExitCode::from(USAGE_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Package {
            params,
            package,
            run,
        } => {
            let mut raw = params.to_raw();
            package.apply(&mut raw);
            run_mode(
                RunMode::Package,
                &params,
                raw,
                package.generate_project_files,
                &run,
            )
        }
        Commands::Test { params, test, run } => {
            let mut raw = params.to_raw();
            test.apply(&mut raw);
            run_mode(RunMode::Test, &params, raw, false, &run)
        }
        Commands::Inspect {
            params,
            inspect,
            run,
        } => {
            let mut raw = params.to_raw();
            inspect.apply(&mut raw);
            run_mode(RunMode::Inspect, &params, raw, false, &run)
        }
        Commands::Clean { project_dir } => clean_command(&project_dir),
        Commands::Check {
            mode,
            json,
            params,
            modes,
        } => {
            let raw = resolve_parameters(params.profile.as_deref(), modes.to_raw(&params))?;
            check_command(mode, &raw, modes.package.generate_project_files, json)
        }
        Commands::Plan {
            mode,
            params,
            modes,
        } => {
            let raw = resolve_parameters(params.profile.as_deref(), modes.to_raw(&params))?;
            let prepared = PreparedPipeline::prepare(
                &ConfigValidator::new(),
                mode,
                &raw,
                modes.package.generate_project_files,
            )?;
            print_plan(&prepared);
            Ok(())
        }
        Commands::Profile { action } => match action {
            ProfileCommands::New { mode, output } => {
                let destination =
                    output.unwrap_or_else(|| PathBuf::from(format!("{mode}.profile.yaml")));
                let path = generate_profile(mode, &destination)?;
                println!("{}", path.display());
                info!(profile = %path.display(), %mode, "Profile template written");
                Ok(())
            }
        },
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "demo-pipeline", &mut io::stdout());
            Ok(())
        }
    }
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer =
                opentelemetry_otlp::new_pipeline()
                    .tracing()
                    .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                        vec![KeyValue::new("service.name", "demo-pipeline")],
                    )))
                    .with_exporter(
                        opentelemetry_otlp::new_exporter()
                            .tonic()
                            .with_endpoint(endpoint),
                    )
                    .install_simple()?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
            return Ok(());
        }
    }

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = otlp_endpoint {
        eprintln!(
            "warning: --otlp-endpoint '{endpoint}' requested but OpenTelemetry support is not \
             enabled. Rebuild with --features otel."
        );
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

/// Profile values overlaid by flags given on the command line.
fn resolve_parameters(profile: Option<&Path>, flags: RawParameters) -> Result<RawParameters> {
    match profile {
        Some(path) => {
            let base = load_profile(path)?;
            info!(profile = %path.display(), "Loaded profile");
            Ok(base.merge(flags))
        }
        None => Ok(flags),
    }
}

fn run_mode(
    mode: RunMode,
    params: &ParamArgs,
    flags: RawParameters,
    generate_project_files: bool,
    run: &RunArgs,
) -> Result<()> {
    let raw = resolve_parameters(params.profile.as_deref(), flags)?;
    let prepared =
        PreparedPipeline::prepare(&ConfigValidator::new(), mode, &raw, generate_project_files)?;

    if run.dry_run {
        print_plan(&prepared);
        return Ok(());
    }

    let launcher = SystemLauncher;
    let report = prepared.execute(&launcher);
    emit_metrics(run, &prepared.executor.metrics().snapshot())?;

    let planned = prepared.plan(&launcher);
    let results = report.into_result()?;
    for result in &results {
        info!(
            stage = result.stage.as_str(),
            detail = result.message.as_str(),
            "Stage succeeded"
        );
    }

    if let Some(path) = &run.manifest {
        let commands = planned.iter().filter_map(|(_, invocation)| invocation.as_ref());
        let manifest = build_manifest(&prepared.config, &prepared.layout, commands, &results)?;
        create_parent(path)?;
        write_manifest(&manifest, path)?;
        info!(manifest = %path.display(), "Run manifest written");
    }

    info!(%mode, project = prepared.config.project_name.as_str(), "Pipeline succeeded");
    Ok(())
}

fn print_plan(prepared: &PreparedPipeline) {
    let launcher = SystemLauncher;
    println!(
        "{} pipeline for {}",
        prepared.config.mode(),
        prepared.layout.project_file.display()
    );
    for (index, (stage, invocation)) in prepared.plan(&launcher).into_iter().enumerate() {
        println!("{:>2}. {stage}", index + 1);
        match invocation {
            Some(invocation) => println!("      {invocation}"),
            None if stage == demo_pipeline::stages::CLEAN_STAGE => println!(
                "      remove {}",
                demo_pipeline::workspace::TEMP_DIRS.join(", ")
            ),
            None => println!("      (command resolved when the stage runs)"),
        }
    }
}

fn emit_metrics(run: &RunArgs, snapshot: &MetricsSnapshot) -> Result<()> {
    if run.print_metrics {
        log_snapshot(snapshot);
    }
    if let Some(path) = &run.metrics_json {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = &run.metrics_prometheus {
        create_parent(path)?;
        fs::write(path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn clean_command(project_dir: &Path) -> Result<()> {
    let project_dir = std::path::absolute(project_dir)
        .with_context(|| format!("Failed to resolve {}", project_dir.display()))?;
    if !project_dir.is_dir() {
        return Err(PipelineError::path_not_found("project directory", project_dir).into());
    }
    let removed = clean_workspace(&project_dir)?;
    for path in &removed {
        println!("removed {}", path.display());
    }
    info!(count = removed.len(), "Workspace cleaned");
    Ok(())
}

fn check_command(
    mode: RunMode,
    raw: &RawParameters,
    generate_project_files: bool,
    json: bool,
) -> Result<()> {
    let validator = ConfigValidator::new();
    let mut report = check_configuration(&validator, mode, raw, generate_project_files);
    report.merge(check_git());

    if json {
        to_writer_pretty(io::stdout(), &report).context("Failed to write check report")?;
        println!();
    } else {
        for warning in &report.warnings {
            warn!("{warning}");
            println!("warning: {warning}");
        }
        for error in &report.errors {
            println!("error: {error}");
        }
        if report.is_ok() {
            println!("{mode} configuration is valid");
        }
    }

    if !report.is_ok() {
        bail!("{} problem(s) found", report.errors.len());
    }
    Ok(())
}

fn is_missing_parameter(err: &anyhow::Error) -> bool {
    let config = match err.downcast_ref::<StageFailure>() {
        Some(failure) => match &failure.source {
            PipelineError::Config(config) => config,
            _ => return false,
        },
        None => return false,
    };
    matches!(config, ConfigError::Missing { .. })
}

fn print_subcommand_help(name: &str) {
    let mut command = Cli::command();
    command.build();
    if let Some(subcommand) = command.find_subcommand_mut(name) {
        eprintln!();
        eprintln!("{}", subcommand.render_long_help());
    }
}

#[derive(Parser)]
#[command(
    name = "demo-pipeline",
    version,
    about = "Package, test or inspect an Unreal demo project against a freshly fetched plugin"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cook, build, stage and archive the demo project for each target platform.
    Package {
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        package: PackageArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Build the editor and run the plugin's automation tests headless.
    Test {
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        test: TestArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Regenerate project files and run the static analyzer.
    Inspect {
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        inspect: InspectArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Remove generated build state from a project directory.
    Clean {
        #[arg(short = 'd', long = "project-dir", value_hint = ValueHint::DirPath)]
        project_dir: PathBuf,
    },
    /// Report every configuration problem for a mode without running anything.
    Check {
        #[arg(value_enum)]
        mode: RunMode,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        modes: ModeArgs,
    },
    /// Print the ordered stages and their command lines without running them.
    Plan {
        #[arg(value_enum)]
        mode: RunMode,
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        modes: ModeArgs,
    },
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Package { .. } => "package",
            Commands::Test { .. } => "test",
            Commands::Inspect { .. } => "inspect",
            Commands::Clean { .. } => "clean",
            Commands::Check { .. } => "check",
            Commands::Plan { .. } => "plan",
            Commands::Profile { .. } => "profile",
            Commands::Completions { .. } => "completions",
        }
    }

    fn otlp_endpoint(&self) -> Option<&str> {
        match self {
            Commands::Package { run, .. }
            | Commands::Test { run, .. }
            | Commands::Inspect { run, .. } => run.otlp_endpoint.as_deref(),
            _ => None,
        }
    }
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Write a YAML profile template for a mode.
    New {
        #[arg(long, value_enum)]
        mode: RunMode,
        #[arg(long, value_hint = ValueHint::FilePath)]
        output: Option<PathBuf>,
    },
}

/// Parameters shared by every mode.
#[derive(Args, Debug, Default)]
struct ParamArgs {
    /// YAML profile with default parameter values; flags override it.
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile: Option<PathBuf>,
    /// Engine installation directory.
    #[arg(short = 'u', long = "engine", value_hint = ValueHint::DirPath)]
    engine: Option<PathBuf>,
    /// Demo project directory.
    #[arg(short = 'd', long = "project-dir", value_hint = ValueHint::DirPath)]
    project_dir: Option<PathBuf>,
    /// Demo project name (the `.uproject` file stem).
    #[arg(short = 'n', long = "project-name")]
    project_name: Option<String>,
    /// Plugin repository URL.
    #[arg(short = 'r', long = "repo")]
    repo: Option<String>,
    /// Plugin branch (defaults to the mode's branch).
    #[arg(short = 'b', long)]
    branch: Option<String>,
    /// Plugin folder name under Plugins/.
    #[arg(long = "plugin-name")]
    plugin_name: Option<String>,
    /// Project file generator executable, instead of the registered one.
    #[arg(long, value_hint = ValueHint::FilePath)]
    generator: Option<PathBuf>,
}

impl ParamArgs {
    fn to_raw(&self) -> RawParameters {
        RawParameters {
            engine_path: self.engine.clone(),
            project_path: self.project_dir.clone(),
            project_name: self.project_name.clone(),
            repo_url: self.repo.clone(),
            branch: self.branch.clone(),
            plugin_name: self.plugin_name.clone(),
            generator: self.generator.clone(),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Default)]
struct PackageArgs {
    /// Directory receiving Packages/<platform>.
    #[arg(short = 'o', long = "build-output", value_hint = ValueHint::DirPath)]
    build_output: Option<PathBuf>,
    /// Target platform; repeat for several (default: Win64, Android).
    #[arg(long = "platform")]
    platforms: Vec<String>,
    /// Regenerate IDE project files after packaging.
    #[arg(long)]
    generate_project_files: bool,
}

impl PackageArgs {
    fn apply(&self, raw: &mut RawParameters) {
        if self.build_output.is_some() {
            raw.build_output = self.build_output.clone();
        }
        if !self.platforms.is_empty() {
            raw.platforms = Some(self.platforms.clone());
        }
    }
}

#[derive(Args, Debug, Default)]
struct TestArgs {
    /// Automation report output path.
    #[arg(short = 'a', long = "autotests-artifact", value_hint = ValueHint::AnyPath)]
    autotests_artifact: Option<PathBuf>,
    /// Automation test name filter (default: Xsolla).
    #[arg(long = "test-filter")]
    test_filter: Option<String>,
}

impl TestArgs {
    fn apply(&self, raw: &mut RawParameters) {
        if self.autotests_artifact.is_some() {
            raw.autotests_artifact = self.autotests_artifact.clone();
        }
        if self.test_filter.is_some() {
            raw.test_filter = self.test_filter.clone();
        }
    }
}

#[derive(Args, Debug, Default)]
struct InspectArgs {
    /// Static analyzer executable.
    #[arg(long, value_hint = ValueHint::FilePath)]
    inspector: Option<PathBuf>,
    /// Directory receiving Inspect/InspectResult.xml.
    #[arg(long = "artifact-root", value_hint = ValueHint::DirPath)]
    artifact_root: Option<PathBuf>,
}

impl InspectArgs {
    fn apply(&self, raw: &mut RawParameters) {
        if self.inspector.is_some() {
            raw.inspector = self.inspector.clone();
        }
        if self.artifact_root.is_some() {
            raw.artifact_root = self.artifact_root.clone();
        }
    }
}

/// Mode-specific flags of every mode, for commands that take the mode as an argument.
#[derive(Args, Debug, Default)]
struct ModeArgs {
    #[command(flatten)]
    package: PackageArgs,
    #[command(flatten)]
    test: TestArgs,
    #[command(flatten)]
    inspect: InspectArgs,
}

impl ModeArgs {
    fn to_raw(&self, params: &ParamArgs) -> RawParameters {
        let mut raw = params.to_raw();
        self.package.apply(&mut raw);
        self.test.apply(&mut raw);
        self.inspect.apply(&mut raw);
        raw
    }
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Validate and print the planned stages without running them.
    #[arg(long)]
    dry_run: bool,
    /// Write a run manifest (YAML, or JSON for a .json path) after a successful run.
    #[arg(long, value_hint = ValueHint::FilePath)]
    manifest: Option<PathBuf>,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    #[arg(long = "otlp-endpoint")]
    otlp_endpoint: Option<String>,
}
