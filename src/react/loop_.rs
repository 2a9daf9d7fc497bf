//! 单轮编排主循环
//!
//! GENERATE -> (EXECUTE_TOOLS -> GENERATE)* -> REFLECT -> (GENERATE ...)* -> DONE。
//! 调用方先用 `ConversationState::begin_turn` 追加用户消息，再调用 run_turn_loop。
//! 取消只在节点切换之间检查；被取消的状态不应被保存。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ConversationState, ResponseQuality, FALLBACK_APOLOGY};
use crate::react::events::{send_event, EventSink, NodeKind, TurnEvent};
use crate::react::generation::{GenerationNode, GenerationOutcome};
use crate::react::reflection::ReflectionNode;
use crate::react::router::{NodeState, RetryPolicy};
use crate::react::tool_node::ToolNode;
use crate::tools::ToolExecutor;

/// 一轮对话的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    pub retry_count: u32,
    pub quality: ResponseQuality,
}

/// 一轮编排所需的节点与策略
pub struct TurnSession<'a> {
    pub generation: &'a GenerationNode,
    pub executor: &'a ToolExecutor,
    pub reflection: &'a ReflectionNode,
    pub policy: RetryPolicy,
    pub cancel_token: CancellationToken,
    /// 可选：事件推送通道
    pub event_tx: EventSink<'a>,
}

impl<'a> TurnSession<'a> {
    pub fn new(
        generation: &'a GenerationNode,
        executor: &'a ToolExecutor,
        reflection: &'a ReflectionNode,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generation,
            executor,
            reflection,
            policy,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

/// 运行一轮编排直到 DONE，写入 final_response 与 response_quality
pub async fn run_turn_loop(
    session: &TurnSession<'_>,
    state: &mut ConversationState,
) -> Result<TurnOutcome, AgentError> {
    if state.is_empty() {
        return Err(AgentError::EmptyState);
    }
    let events = session.event_tx;
    let policy = &session.policy;
    let tools = ToolNode::new(session.executor);

    let mut node = NodeState::Generate;
    // 当前尝试内已执行的工具轮数，重试时归零
    let mut tool_rounds: u32 = 0;

    while node != NodeState::Done {
        if session.cancel_token.is_cancelled() {
            tracing::info!(retry_count = state.retry_count, "turn cancelled");
            send_event(events, TurnEvent::Cancelled);
            return Err(AgentError::Cancelled);
        }

        node = match node {
            NodeState::Generate => {
                send_event(
                    events,
                    TurnEvent::NodeEntered {
                        node: NodeKind::Generate,
                        retry_count: state.retry_count,
                    },
                );
                let answer_only = policy.answer_only(tool_rounds);
                if answer_only {
                    tracing::warn!(tool_rounds, "tool round limit reached, answer-only generation");
                    send_event(events, TurnEvent::AnswerOnlyMode { tool_rounds });
                }
                if let GenerationOutcome::Failed(reason) =
                    session.generation.run(state, answer_only).await?
                {
                    send_event(events, TurnEvent::GenerationFailed { reason });
                }
                policy.after_generate(state)
            }
            NodeState::ExecuteTools => {
                send_event(
                    events,
                    TurnEvent::NodeEntered {
                        node: NodeKind::ExecuteTools,
                        retry_count: state.retry_count,
                    },
                );
                tool_rounds += 1;
                tools.run(state, events).await?;
                policy.after_tools()
            }
            NodeState::Reflect => {
                send_event(
                    events,
                    TurnEvent::NodeEntered {
                        node: NodeKind::Reflect,
                        retry_count: state.retry_count,
                    },
                );
                let verdict = session.reflection.evaluate(state);
                send_event(events, TurnEvent::Reflection { verdict: verdict.clone() });
                state.reflection = Some(verdict);
                let next = policy.after_reflect(state);
                if next == NodeState::Generate {
                    tool_rounds = 0;
                    let suggested_tool = state
                        .reflection
                        .as_ref()
                        .and_then(|v| v.suggested_tool.clone());
                    tracing::info!(
                        retry_count = state.retry_count,
                        suggested_tool = ?suggested_tool,
                        "retrying with reflection guidance"
                    );
                    send_event(
                        events,
                        TurnEvent::Retry {
                            retry_count: state.retry_count,
                            suggested_tool,
                        },
                    );
                }
                next
            }
            NodeState::Done => NodeState::Done,
        };
    }

    let answer = state
        .last_plain_answer()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or(FALLBACK_APOLOGY)
        .to_string();
    let quality = match &state.reflection {
        Some(v) if v.is_sufficient => ResponseQuality::Verified,
        Some(v) if v.wants_retry() => ResponseQuality::RetriesExhausted,
        _ => ResponseQuality::Unverified,
    };
    state.final_response = Some(answer.clone());
    state.response_quality = Some(quality);

    let exhausted = quality == ResponseQuality::RetriesExhausted;
    if exhausted {
        tracing::warn!(retry_count = state.retry_count, "retries exhausted, returning last answer");
    }
    send_event(
        events,
        TurnEvent::TurnFinished {
            answer: answer.clone(),
            retry_count: state.retry_count,
            exhausted,
        },
    );

    Ok(TurnOutcome {
        answer,
        retry_count: state.retry_count,
        quality,
    })
}
