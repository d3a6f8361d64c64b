//! Quorum — multi-agent collaboration with an autonomous skill pipeline
//!
//! This library coordinates multiple LLM agents ("slots") to propose,
//! refine, and vote on solutions to user requests, then autonomously
//! generates, safety-validates, sandbox-tests, and promotes executable
//! skill artifacts derived from the winning solution.
//!
//! # Subsystems
//!
//! - [`collab`]: the three-phase collaboration engine (proposal,
//!   refinement, vote) with per-session worker supervision
//! - [`autonomy`]: the skill pipeline from intent detection through
//!   promotion, including the sandbox-test/heal retry loop
//! - [`skills`]: the persistent skill registry
//! - [`errors`]: error tracking and the collaboration-driven healer
//! - [`invoker`]: provider strategies behind one agent-call interface
//! - [`sandbox`]: the isolated execution capability
//! - [`safety`]: the static deny-list gate over generated code
//! - [`campaigns`]: multi-step autonomous work tracking

pub mod autonomy;
pub mod campaigns;
pub mod collab;
pub mod config;
pub mod errors;
pub mod invoker;
pub mod safety;
pub mod sandbox;
pub mod skills;

// Re-export key collaboration types
pub use collab::{
    CollabEngine, CollaborationSession, InMemorySessionStore, Phase, SessionStatus, SessionStore,
    SharedSessionStore, WinningSolution,
};

// Re-export key pipeline types
pub use autonomy::{
    AttemptRecord, AuditEvent, AuditLog, AutonomyPipeline, IntentDetector, PipelineResponse,
};

// Re-export key skill types
pub use skills::{Skill, SkillOutcome, SkillRegistry, SkillStatus};

// Re-export error subsystem types
pub use errors::{ErrorHealer, ErrorSeverity, ErrorTracker, SystemError};

// Re-export invoker and sandbox seams
pub use invoker::{AgentInvoker, HttpInvoker, InvokerError, SharedInvoker};
pub use sandbox::{DockerSandbox, ExecutionReport, SandboxExecutor, SharedSandbox};

// Re-export configuration
pub use config::QuorumConfig;
