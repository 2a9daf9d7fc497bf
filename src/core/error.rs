//! Agent 错误类型
//!
//! 工具与 LLM 的失败在节点内部被转换为消息数据；只有路由不变式被破坏、检查点读写失败、
//! 配置错误与取消会以 AgentError 的形式离开编排循环。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 状态中没有任何消息（编程错误）
    #[error("Conversation state has no messages")]
    EmptyState,

    /// 工具执行节点被调用时没有待处理的工具调用（编程错误）
    #[error("No pending tool calls on the last assistant message")]
    NoPendingToolCalls,

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Turn cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否为路由不变式被破坏（开发期应直接暴露）
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, AgentError::EmptyState | AgentError::NoPendingToolCalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_routing_errors_are_invariant_violations() {
        assert!(AgentError::EmptyState.is_invariant_violation());
        assert!(AgentError::NoPendingToolCalls.is_invariant_violation());
        assert!(!AgentError::LlmError("502".into()).is_invariant_violation());
        assert!(!AgentError::Cancelled.is_invariant_violation());
    }
}
