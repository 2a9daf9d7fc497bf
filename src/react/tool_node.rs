//! Tool 执行节点：按顺序执行最后一条 assistant 消息中的全部工具调用
//!
//! 每个调用恰好对应一条 tool 消息（tool_call_id 相同）。工具失败、超时或未注册时，
//! 写入 `Error executing <tool>: <原因>` 作为结果，交给反思节点处理，不会中断本轮。

use crate::core::{AgentError, ConversationState};
use crate::memory::Message;
use crate::react::events::{preview, send_event, EventSink, TurnEvent};
use crate::tools::ToolExecutor;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

pub struct ToolNode<'a> {
    executor: &'a ToolExecutor,
}

impl<'a> ToolNode<'a> {
    pub fn new(executor: &'a ToolExecutor) -> Self {
        Self { executor }
    }

    /// 执行待处理调用；返回本次写入的 tool 消息条数
    pub async fn run(
        &self,
        state: &mut ConversationState,
        events: EventSink<'_>,
    ) -> Result<usize, AgentError> {
        let calls = state
            .pending_tool_calls()
            .ok_or(AgentError::NoPendingToolCalls)?
            .to_vec();

        for call in &calls {
            send_event(
                events,
                TurnEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool: call.tool_name.clone(),
                    args: call.arguments.clone(),
                },
            );
            let (content, is_error) = match self
                .executor
                .execute(&call.tool_name, call.arguments.clone())
                .await
            {
                Ok(output) => (output, false),
                Err(e) => {
                    tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "tool failed");
                    (format!("Error executing {}: {e}", call.tool_name), true)
                }
            };
            send_event(
                events,
                TurnEvent::Observation {
                    call_id: call.call_id.clone(),
                    tool: call.tool_name.clone(),
                    preview: preview(&content, OBSERVATION_PREVIEW_CHARS),
                    is_error,
                },
            );
            state.push(Message::tool(call, content));
        }
        Ok(calls.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Role, ToolCall};
    use crate::tools::{Tool, ToolOutput, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "uppercase"
        }
        async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
            match args["text"].as_str() {
                Some(t) => Ok(t.to_uppercase().into()),
                None => Err("missing text".into()),
            }
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        ToolExecutor::new(registry, 5)
    }

    #[tokio::test]
    async fn no_pending_calls_is_an_error() {
        let exec = executor();
        let mut state = ConversationState::new();
        state.begin_turn("halo");
        state.push(Message::assistant("hai"));
        let err = ToolNode::new(&exec).run(&mut state, None).await.unwrap_err();
        assert_eq!(err, AgentError::NoPendingToolCalls);
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn every_call_gets_one_result_in_order() {
        let exec = executor();
        let calls = vec![
            ToolCall::new("upper", json!({"text": "a"})),
            ToolCall::new("missing_tool", json!({})),
            ToolCall::new("upper", json!({})),
        ];
        let mut state = ConversationState::new();
        state.begin_turn("q");
        state.push(Message::assistant_with_calls("", calls.clone()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let n = ToolNode::new(&exec).run(&mut state, Some(&tx)).await.unwrap();
        assert_eq!(n, 3);

        let results = &state.messages()[2..];
        assert_eq!(results.len(), 3);
        for (call, msg) in calls.iter().zip(results) {
            assert_eq!(msg.role, Role::Tool);
            assert_eq!(msg.tool_call_id.as_deref(), Some(call.call_id.as_str()));
        }
        assert_eq!(results[0].content, "A");
        assert!(results[1].content.starts_with("Error executing missing_tool"));
        assert!(results[2].content.contains("missing text"));

        let mut errors = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let TurnEvent::Observation { is_error, .. } = ev {
                errors.push(is_error);
            }
        }
        assert_eq!(errors, vec![false, true, true]);
    }
}
