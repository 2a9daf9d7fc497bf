//! 面向用户的错误恢复
//!
//! 任何离开编排循环的 AgentError 都要转成一句自然语言（印尼语，与产品语言一致），
//! 用户永远看不到原始错误或堆栈。

use crate::core::AgentError;

/// 兜底道歉语
pub const FALLBACK_APOLOGY: &str =
    "Maaf, saya belum bisa memberikan jawaban untuk permintaan ini. Silakan coba ulangi dengan kalimat yang berbeda.";

/// 将错误映射为用户可见的回复
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn user_message(&self, err: &AgentError) -> String {
        match err {
            AgentError::Cancelled => "Permintaan dibatalkan.".to_string(),
            AgentError::LlmError(_) | AgentError::ToolTimeout(_) => {
                "Maaf, layanan sedang lambat atau tidak tersedia. Silakan coba beberapa saat lagi.".to_string()
            }
            AgentError::Checkpoint(_) => {
                "Maaf, riwayat percakapan tidak dapat dimuat atau disimpan saat ini. Silakan coba lagi.".to_string()
            }
            _ => FALLBACK_APOLOGY.to_string(),
        }
    }

    /// 生成节点调用 LLM 失败时追加的 assistant 消息内容（原始错误只写日志）
    pub fn generation_failure(&self) -> String {
        "Maaf, terjadi kesalahan saat saya mencoba memproses permintaan Anda. Silakan coba lagi."
            .to_string()
    }
}
