pub mod config;
pub mod error;
pub mod logging;
pub mod synth;

pub use config::Settings;
pub use error::AppError;
pub use synth::orchestrator::TurnEvent;
pub use synth::pipeline::SynthPipeline;
pub use synth::platform::Platform;
pub use synth::types::{DeploymentRecord, ValidationReport, WorkflowDraft};
