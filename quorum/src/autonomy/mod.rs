//! Autonomous skill pipeline: intent, generation, gating, healing, promotion

mod audit;
mod extract;
mod intent;
mod pipeline;

pub use audit::{content_hash, AuditError, AuditEvent, AuditLog, AuditResult};
pub use extract::extract_code;
pub use intent::{IntentDetector, IntentReport, MISSING_SPECIFIC_REQUEST};
pub use pipeline::{
    basic_skill_template, AttemptRecord, AutonomyPipeline, CapabilityMatch, PipelineResponse,
};
