//! DeepSeek 后端（OpenAI 兼容接口）

use crate::config::LlmSection;
use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// DEEPSEEK_API_KEY 优先，其次 OPENAI_API_KEY
pub fn deepseek_api_key() -> Option<String> {
    std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
}

fn deepseek_model(llm: &LlmSection) -> &str {
    if llm.model.trim().is_empty() {
        DEEPSEEK_CHAT
    } else {
        &llm.model
    }
}

/// 由 [llm] 段创建客户端；base_url 未配置时使用官方地址
pub fn create_deepseek_client(llm: &LlmSection) -> OpenAiClient {
    let base_url = llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
    let key = deepseek_api_key();
    OpenAiClient::new(Some(base_url), deepseek_model(llm), key.as_deref())
        .with_temperature(llm.temperature)
}
