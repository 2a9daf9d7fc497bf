//! 轮次过程事件：每次节点切换后推送，供 UI 展示进度或做调试记录
//!
//! 观察者以 `Option<&UnboundedSender<TurnEvent>>` 注入，没有全局单例。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::ReflectionVerdict;

/// 编排节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Generate,
    ExecuteTools,
    Reflect,
}

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 新的一轮开始
    TurnStarted { thread_id: String, user_text: String },
    /// 进入节点
    NodeEntered { node: NodeKind, retry_count: u32 },
    /// 调用工具
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        call_id: String,
        tool: String,
        preview: String,
        is_error: bool,
    },
    /// 生成节点调用 LLM 失败（已转为道歉消息）
    GenerationFailed { reason: String },
    /// 反思结论
    Reflection { verdict: ReflectionVerdict },
    /// 带指导重试
    Retry {
        retry_count: u32,
        suggested_tool: Option<String>,
    },
    /// 工具轮数已用完，下一次生成只允许直接回答
    AnswerOnlyMode { tool_rounds: u32 },
    /// 本轮结束
    TurnFinished {
        answer: String,
        retry_count: u32,
        exhausted: bool,
    },
    /// 本轮被取消（不保存检查点）
    Cancelled,
}

/// 事件观察者
pub type EventSink<'a> = Option<&'a UnboundedSender<TurnEvent>>;

pub(crate) fn send_event(tx: EventSink<'_>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 截断为预览文本
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = TurnEvent::NodeEntered {
            node: NodeKind::ExecuteTools,
            retry_count: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "node_entered");
        assert_eq!(json["node"], "execute_tools");
    }

    #[test]
    fn preview_truncates_by_chars() {
        assert_eq!(preview("pelanggan", 3), "pel...");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[test]
    fn send_without_sink_is_noop() {
        send_event(None, TurnEvent::Cancelled);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        send_event(Some(&tx), TurnEvent::Cancelled);
        assert!(matches!(rx.try_recv(), Ok(TurnEvent::Cancelled)));
    }
}
