pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod profile;
pub mod stages;
pub mod validation;
pub mod workspace;

pub use config::{ConfigValidator, PipelineConfig, RawParameters, RunMode};
pub use error::{ConfigError, PipelineError, StageFailure};
pub use pipeline::{PipelineReport, PreparedPipeline, RunState, StageResult, run_pipeline};
pub use process::{ProcessLauncher, SystemLauncher, ToolInvocation};
