//! 核心层：错误、会话状态与反思结论、面向用户的错误恢复

pub mod error;
pub mod recovery;
pub mod state;

pub use error::AgentError;
pub use recovery::{RecoveryEngine, FALLBACK_APOLOGY};
pub use state::{ConversationState, NextAction, ReflectionVerdict, ResponseQuality};
