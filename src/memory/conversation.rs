//! 对话记录：消息、角色与工具调用请求
//!
//! 消息一旦追加即不可变；工具结果消息通过 tool_call_id 与发起调用的 assistant 消息关联。

use serde::{Deserialize, Serialize};

/// 消息角色（System 仅用于拼接 LLM 上下文，不进入对话记录）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// LLM 发出的单个工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// 生成 call_<uuid> 形式的调用 ID
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            call_id: format!("call_{}", uuid::Uuid::new_v4()),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 assistant 消息可能非空
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 tool 消息设置，对应所回答的调用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 仅 tool 消息设置，产生该结果的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// 带工具调用的 assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// 工具结果消息
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.call_id.clone()),
            tool_name: Some(call.tool_name.clone()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 不带工具调用的 assistant 消息（即一次直接回答）
    pub fn is_plain_answer(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_correlates_to_call() {
        let call = ToolCall::new("query_asset_database", serde_json::json!({"q": "x"}));
        let msg = Message::tool(&call, "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some(call.call_id.as_str()));
        assert_eq!(msg.tool_name.as_deref(), Some("query_asset_database"));
        assert!(call.call_id.starts_with("call_"));
    }

    #[test]
    fn plain_answer_detection() {
        assert!(Message::assistant("hi").is_plain_answer());
        let call = ToolCall::new("t", serde_json::json!({}));
        assert!(!Message::assistant_with_calls("", vec![call]).is_plain_answer());
        assert!(!Message::user("hi").is_plain_answer());
    }

    #[test]
    fn serde_skips_empty_tool_fields() {
        let json = serde_json::to_string(&Message::user("halo")).unwrap();
        assert!(!json.contains("tool_calls"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Message::user("halo"));
    }
}
