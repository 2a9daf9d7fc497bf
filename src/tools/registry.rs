//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并统一转 AgentError。工具失败一律通过 Err(String) 返回，不得 panic。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

/// 工具返回值：纯文本或结构化 JSON
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// 转为写入 tool 消息的文本
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(s) => s,
            ToolOutput::Json(v) => serde_json::to_string(&v).unwrap_or_else(|_| v.to_string()),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(v: Value) -> Self {
        ToolOutput::Json(v)
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（tool call 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    /// 长时间运行的工具可声明自己需要的超时，执行器取它与全局超时的较大值
    fn timeout_hint(&self) -> Option<std::time::Duration> {
        None
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<ToolOutput, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>（BTreeMap 保证提示词中工具顺序稳定）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 提示词中「可用工具」段落（名称、描述、参数 schema 的 JSON 数组）
    pub fn to_schema_json(&self) -> String {
        let specs: Vec<ToolSpec<'_>> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name(),
                description: tool.description(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        serde_json::to_string_pretty(&specs).unwrap_or_else(|_| "[]".to_string())
    }
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(|s| ToolOutput::Text(s.to_uppercase()))
                .ok_or_else(|| "missing 'text'".to_string())
        }
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(Upper);
        let tool = reg.get("upper").unwrap();
        let out = tool.execute(json!({"text": "fat"})).await;
        assert_eq!(out, Ok(ToolOutput::Text("FAT".into())));
        assert!(tool.execute(json!({})).await.is_err());
        assert!(reg.get("nope").is_none());
        assert_eq!(reg.tool_names(), vec!["upper"]);
    }

    #[test]
    fn json_output_serializes_to_text() {
        let out = ToolOutput::Json(serde_json::json!({"total": 12}));
        assert_eq!(out.into_text(), r#"{"total":12}"#);
    }

    #[test]
    fn schema_lists_registered_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(Upper);
        let schema = reg.to_schema_json();
        assert!(schema.contains("\"upper\""));
        assert!(schema.contains("Uppercase text"));
    }
}
