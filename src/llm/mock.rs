//! 测试与离线用 LLM 客户端
//!
//! - MockLlmClient：无需 API，看到工具结果就总结，否则直接回显用户问题
//! - ScriptedLlmClient：按顺序返回预设回复，并记录每次收到的上下文，供测试断言

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// 渲染后的工具结果前缀（与生成节点的渲染格式一致）
const OBSERVATION_PREFIX: &str = "Observation from ";

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role != Role::System)
            .ok_or_else(|| "(no input)".to_string())?;

        if last.content.starts_with(OBSERVATION_PREFIX) {
            return Ok(format!("Berikut hasil yang saya temukan:\n{}", last.content));
        }
        Ok(format!("Mock: {}", last.content))
    }
}

/// 预设脚本客户端：依次弹出回复；脚本耗尽后使用 fallback（未设置则返回错误）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<Result<String, String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 追加一次失败的调用
    pub fn then_error(self, err: impl Into<String>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err.into()));
        }
        self
    }

    /// 脚本耗尽后一直返回该回复
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(Ok(reply.into()));
        self
    }

    /// 脚本耗尽后一直失败
    pub fn with_fallback_error(mut self, err: impl Into<String>) -> Self {
        self.fallback = Some(Err(err.into()));
        self
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次调用收到的完整上下文
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err("no scripted reply left".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_summarises_observations() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("Observation from query_asset_database [call_1]: 12"),
        ];
        let out = MockLlmClient.complete(&msgs).await.unwrap();
        assert!(out.contains("12"));
        let out = MockLlmClient.complete(&[Message::user("halo")]).await.unwrap();
        assert_eq!(out, "Mock: halo");
    }

    #[tokio::test]
    async fn scripted_replies_in_order_then_fallback() {
        let llm = ScriptedLlmClient::new(["a", "b"]).then_error("boom").with_fallback("z");
        let m = [Message::user("q")];
        assert_eq!(llm.complete(&m).await, Ok("a".into()));
        assert_eq!(llm.complete(&m).await, Ok("b".into()));
        assert_eq!(llm.complete(&m).await, Err("boom".into()));
        assert_eq!(llm.complete(&m).await, Ok("z".into()));
        assert_eq!(llm.call_count(), 4);
        assert_eq!(llm.requests()[0][0].content, "q");
    }

    #[tokio::test]
    async fn scripted_without_fallback_errors_when_exhausted() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new());
        assert!(llm.complete(&[Message::user("q")]).await.is_err());
    }
}
