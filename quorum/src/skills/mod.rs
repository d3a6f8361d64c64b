//! Persistent skill catalog and execution

mod registry;
mod types;

pub use registry::{
    execution_harness, parse_result_line, RegistryError, RegistryResult, SharedSkillRegistry,
    SkillOutcome, SkillRegistry, BUILTIN_SYSTEM_INFO,
};
pub use types::{extract_capabilities, Skill, SkillStatus, SkillSummary};
