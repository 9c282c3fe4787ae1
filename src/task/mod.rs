//! Automation scripts and the background executor that runs them.

mod executor;
mod script;

pub use executor::{
    start_app_command, ExecutorConfig, ReportCallback, ScriptOutcome, ScriptReport, TaskExecutor,
};
pub use script::{
    step_kind_of, AutomationScript, AutomationStep, BasicAction, BasicStep, Roi, ScriptError,
    StepKind, SystemAction, SystemStep, VisionAction, VisionStep, ACTIONS, DEFAULT_BASE_HEIGHT,
    DEFAULT_BASE_WIDTH, DEFAULT_VISION_TIMEOUT_MS,
};
