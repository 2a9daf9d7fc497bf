//! 工具调用 JSON Schema（schemars 生成）
//!
//! 将「合法 tool call 回复」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单个调用：与生成节点解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 query_asset_database、search_internal_documents
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 一次回复中的全部调用，按执行顺序排列
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallReply {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用回复的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallReply);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mentions_fields() {
        let s = tool_call_schema_json();
        assert!(s.contains("tool_calls"));
        assert!(s.contains("args"));
    }
}
