//! 会话状态：一次编排运行中唯一的可变记录
//!
//! messages 只追加不删除；retry_count 仅在新的用户消息开启一轮时归零。
//! 整个结构可序列化，作为检查点在轮次之间保存。

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role, ToolCall};

/// 反思给出的下一步动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    Finish,
    Retry,
}

/// 反思结论：每次运行 Reflection 节点都生成新的一份，只会被替换不会被修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub is_sufficient: bool,
    pub critique: String,
    pub next_action: NextAction,
    pub suggested_tool: Option<String>,
    pub reasoning: String,
    /// 识别出的意图类别
    #[serde(default)]
    pub category: String,
    /// 两步流程中第一步已完成、需要继续第二步（不算作错误）
    #[serde(default)]
    pub continuation: bool,
}

impl ReflectionVerdict {
    pub fn finish(category: impl Into<String>, critique: impl Into<String>) -> Self {
        let category = category.into();
        Self {
            is_sufficient: true,
            critique: critique.into(),
            next_action: NextAction::Finish,
            suggested_tool: None,
            reasoning: format!("Tool evaluation for {category} - CORRECT"),
            category,
            continuation: false,
        }
    }

    pub fn retry(
        category: impl Into<String>,
        critique: impl Into<String>,
        suggested_tool: Option<String>,
    ) -> Self {
        let category = category.into();
        Self {
            is_sufficient: false,
            critique: critique.into(),
            next_action: NextAction::Retry,
            suggested_tool,
            reasoning: format!("Tool evaluation for {category} - INCORRECT"),
            category,
            continuation: false,
        }
    }

    /// 两步流程的「继续」：仍走 RETRY 分支，但标记为进展而非失败
    pub fn proceed(category: impl Into<String>, critique: impl Into<String>, next_tool: String) -> Self {
        let category = category.into();
        Self {
            is_sufficient: false,
            critique: critique.into(),
            next_action: NextAction::Retry,
            suggested_tool: Some(next_tool),
            reasoning: format!("Tool evaluation for {category} - IN PROGRESS"),
            category,
            continuation: true,
        }
    }

    pub fn wants_retry(&self) -> bool {
        self.next_action == NextAction::Retry && !self.is_sufficient
    }
}

/// 最终回答的质量标记（交给展示层）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseQuality {
    /// 反思确认工具使用正确
    Verified,
    /// 达到重试上限仍未通过反思
    RetriesExhausted,
    /// 未经反思确认（如缺少结论）
    Unverified,
}

/// 会话状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    pub reflection: Option<ReflectionVerdict>,
    pub retry_count: u32,
    pub final_response: Option<String>,
    pub response_quality: Option<ResponseQuality>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启新一轮：清空上一轮的反思与临时字段，retry_count 归零，追加用户消息
    pub fn begin_turn(&mut self, user_text: impl Into<String>) {
        self.reflection = None;
        self.retry_count = 0;
        self.final_response = None;
        self.response_quality = None;
        self.messages.push(Message::user(user_text));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 最近一条用户消息的下标
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.last_user_index().map(|i| &self.messages[i])
    }

    /// 本轮消息：最近一条用户消息之后的全部消息
    pub fn turn_messages(&self) -> &[Message] {
        match self.last_user_index() {
            Some(i) => &self.messages[i + 1..],
            None => &[],
        }
    }

    /// 尚未回答的工具调用（最后一条为带调用的 assistant 消息时）
    pub fn pending_tool_calls(&self) -> Option<&[ToolCall]> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant && m.has_tool_calls())
            .map(|m| m.tool_calls.as_slice())
    }

    /// 本轮最后一条直接回答的内容
    pub fn last_plain_answer(&self) -> Option<&str> {
        self.turn_messages()
            .iter()
            .rev()
            .find(|m| m.is_plain_answer())
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_turn_resets_scratch_fields_but_keeps_history() {
        let mut state = ConversationState::new();
        state.begin_turn("halo");
        state.push(Message::assistant("hai"));
        state.retry_count = 2;
        state.reflection = Some(ReflectionVerdict::finish("UNKNOWN", "ok"));
        state.final_response = Some("hai".into());

        state.begin_turn("berapa pelanggan?");
        assert_eq!(state.len(), 3);
        assert_eq!(state.retry_count, 0);
        assert!(state.reflection.is_none());
        assert!(state.final_response.is_none());
        assert!(state.turn_messages().is_empty());
    }

    #[test]
    fn pending_tool_calls_only_for_trailing_assistant_request() {
        let mut state = ConversationState::new();
        state.begin_turn("apa itu FAT?");
        assert!(state.pending_tool_calls().is_none());

        let call = ToolCall::new("search_internal_documents", serde_json::json!({}));
        state.push(Message::assistant_with_calls("", vec![call.clone()]));
        assert_eq!(state.pending_tool_calls().map(|c| c.len()), Some(1));

        state.push(Message::tool(&call, "FAT adalah ..."));
        assert!(state.pending_tool_calls().is_none());
    }

    #[test]
    fn last_plain_answer_is_scoped_to_current_turn() {
        let mut state = ConversationState::new();
        state.begin_turn("q1");
        state.push(Message::assistant("a1"));
        state.begin_turn("q2");
        assert_eq!(state.last_plain_answer(), None);
        state.push(Message::assistant("a2"));
        assert_eq!(state.last_plain_answer(), Some("a2"));
    }

    #[test]
    fn verdict_constructors() {
        let v = ReflectionVerdict::retry("DATA", "wrong", Some("query_asset_database".into()));
        assert!(v.wants_retry());
        let v = ReflectionVerdict::proceed("VIZ", "good progress", "create_visualization".into());
        assert!(v.wants_retry());
        assert!(v.continuation);
        let v = ReflectionVerdict::finish("DATA", "ok");
        assert!(!v.wants_retry());
        assert_eq!(v.next_action, NextAction::Finish);
    }
}
