//! Error tracking and collaboration-driven healing

mod healer;
mod tracker;

pub use healer::{
    parse_solution_sections, ActionOutcome, ErrorHealer, HealingStatistics, SafeAction,
};
pub use tracker::{ErrorSeverity, ErrorStatistics, ErrorTracker, SystemError};
