//! 路由与重试策略
//!
//! 状态转移：
//! - GENERATE 之后：最后一条 assistant 消息带工具调用则 EXECUTE_TOOLS，否则 REFLECT
//! - EXECUTE_TOOLS 之后：总是回到 GENERATE
//! - REFLECT 之后：结论要求重试且 retry_count < max_retries 时回到 GENERATE（先把 retry_count 加一），否则 DONE
//!
//! 单次尝试内的工具轮数另有上限，超过后下一次生成只允许直接回答，因此每轮对话必然终止。

use crate::config::OrchestratorSection;
use crate::core::ConversationState;

/// 编排状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Generate,
    ExecuteTools,
    Reflect,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_tool_rounds: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_tool_rounds: 4,
        }
    }
}

impl From<&OrchestratorSection> for RetryPolicy {
    fn from(section: &OrchestratorSection) -> Self {
        Self {
            max_retries: section.max_retries,
            max_tool_rounds: section.max_tool_rounds,
        }
    }
}

impl RetryPolicy {
    pub fn after_generate(&self, state: &ConversationState) -> NodeState {
        if state.pending_tool_calls().is_some() {
            NodeState::ExecuteTools
        } else {
            NodeState::Reflect
        }
    }

    pub fn after_tools(&self) -> NodeState {
        NodeState::Generate
    }

    /// 决定是否重试；重试时 retry_count 加一
    pub fn after_reflect(&self, state: &mut ConversationState) -> NodeState {
        let wants_retry = state.reflection.as_ref().is_some_and(|v| v.wants_retry());
        if wants_retry && state.retry_count < self.max_retries {
            state.retry_count += 1;
            NodeState::Generate
        } else {
            NodeState::Done
        }
    }

    /// 本次尝试已执行的工具轮数达到上限后，生成只允许直接回答
    pub fn answer_only(&self, tool_rounds: u32) -> bool {
        tool_rounds >= self.max_tool_rounds
    }

    /// 单轮对话中生成次数的上界
    pub fn max_generations(&self) -> u32 {
        (self.max_retries + 1) * (self.max_tool_rounds + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReflectionVerdict;
    use crate::memory::{Message, ToolCall};

    fn state_with_answer() -> ConversationState {
        let mut state = ConversationState::new();
        state.begin_turn("berapa pelanggan");
        state.push(Message::assistant("banyak"));
        state
    }

    #[test]
    fn generate_routes_on_pending_calls() {
        let policy = RetryPolicy::default();
        let mut state = state_with_answer();
        assert_eq!(policy.after_generate(&state), NodeState::Reflect);
        state.push(Message::assistant_with_calls(
            "",
            vec![ToolCall::new("sql_agent", serde_json::json!({}))],
        ));
        assert_eq!(policy.after_generate(&state), NodeState::ExecuteTools);
        assert_eq!(policy.after_tools(), NodeState::Generate);
    }

    #[test]
    fn retries_until_limit_then_done() {
        let policy = RetryPolicy::default();
        let mut state = state_with_answer();
        state.reflection = Some(ReflectionVerdict::retry("DATA_DATABASE", "wrong", None));

        assert_eq!(policy.after_reflect(&mut state), NodeState::Generate);
        assert_eq!(state.retry_count, 1);
        assert_eq!(policy.after_reflect(&mut state), NodeState::Generate);
        assert_eq!(state.retry_count, 2);
        assert_eq!(policy.after_reflect(&mut state), NodeState::Done);
        assert_eq!(state.retry_count, 2);
    }

    #[test]
    fn sufficient_or_missing_verdict_is_done() {
        let policy = RetryPolicy::default();
        let mut state = state_with_answer();
        assert_eq!(policy.after_reflect(&mut state), NodeState::Done);
        state.reflection = Some(ReflectionVerdict::finish("DATA_DATABASE", "ok"));
        assert_eq!(policy.after_reflect(&mut state), NodeState::Done);
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn continuation_counts_as_retry() {
        let policy = RetryPolicy {
            max_retries: 0,
            max_tool_rounds: 4,
        };
        let mut state = state_with_answer();
        state.reflection = Some(ReflectionVerdict::proceed(
            "VISUALIZATION_WITH_DATA",
            "GOOD PROGRESS",
            "create_visualization".into(),
        ));
        assert_eq!(policy.after_reflect(&mut state), NodeState::Done);
    }

    #[test]
    fn answer_only_after_tool_round_limit() {
        let policy = RetryPolicy::default();
        assert!(!policy.answer_only(3));
        assert!(policy.answer_only(4));
        assert_eq!(policy.max_generations(), 15);
    }
}
