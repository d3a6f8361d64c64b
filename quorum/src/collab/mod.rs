//! Multi-agent collaboration: sessions, store, and the three-phase engine

mod engine;
mod store;
mod types;

pub use engine::{CollabEngine, EngineError, EngineResult};
pub use store::{InMemorySessionStore, SessionStore, SharedSessionStore};
pub use types::{
    CollaborationSession, Phase, SessionId, SessionStatus, WinningSolution,
};
