//! 远程 HTTP 工具
//!
//! 数据查询、文档检索、网络搜索、可视化等能力由外部服务实现；本工具只负责把参数 POST 过去，
//! 返回响应体（JSON 响应保留结构）。非 2xx 与网络错误都转为 Err 文本。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::RemoteToolSection;
use crate::tools::{Tool, ToolOutput};

/// 错误响应体预览最大字符数
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

/// 远程工具：POST JSON 参数到 endpoint
pub struct HttpTool {
    client: Client,
    name: String,
    description: String,
    endpoint: String,
    parameters: Option<Value>,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("iconnet-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            parameters: None,
        }
    }

    pub fn from_config(section: &RemoteToolSection, timeout_secs: u64) -> Self {
        let tool = Self::new(
            section.name.clone(),
            section.description.clone(),
            section.endpoint.clone(),
            timeout_secs,
        );
        match &section.parameters {
            Some(schema) => tool.with_parameters(schema.clone()),
            None => tool,
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// 响应体：能解析为 JSON 则保留结构，否则按文本返回
fn parse_body(body: String) -> ToolOutput {
    match serde_json::from_str::<Value>(&body) {
        Ok(v) if v.is_object() || v.is_array() => ToolOutput::Json(v),
        _ => ToolOutput::Text(body),
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > ERROR_BODY_PREVIEW_CHARS {
        format!("{}...", body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect::<String>())
    } else {
        body.to_string()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone().unwrap_or_else(|| {
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        tracing::debug!(tool = %self.name, endpoint = %self.endpoint, "remote tool call");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&args)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        if !status.is_success() {
            return Err(format!("HTTP {status}: {}", preview(&body)));
        }
        Ok(parse_body(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies_keep_structure() {
        assert_eq!(
            parse_body(r#"{"total": 3}"#.to_string()),
            ToolOutput::Json(serde_json::json!({"total": 3}))
        );
        assert_eq!(parse_body("42".to_string()), ToolOutput::Text("42".into()));
        assert_eq!(parse_body("plain".to_string()), ToolOutput::Text("plain".into()));
    }

    #[test]
    fn default_schema_requires_query() {
        let tool = HttpTool::new("search_internal_documents", "docs", "http://127.0.0.1:1/x", 1);
        assert_eq!(tool.parameters_schema()["required"][0], "query");
        let tool = tool.with_parameters(serde_json::json!({"type": "object"}));
        assert_eq!(tool.parameters_schema(), serde_json::json!({"type": "object"}));
    }

    #[test]
    fn configured_schema_overrides_default() {
        let section = RemoteToolSection {
            name: "query_asset_database".into(),
            description: "Asset DB".into(),
            endpoint: "http://127.0.0.1:1/query".into(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": { "sql": { "type": "string" } }
            })),
        };
        let tool = HttpTool::from_config(&section, 5);
        assert_eq!(tool.parameters_schema()["properties"]["sql"]["type"], "string");

        let plain = HttpTool::from_config(&RemoteToolSection { parameters: None, ..section }, 5);
        assert_eq!(plain.parameters_schema()["required"][0], "query");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error_not_a_panic() {
        let tool = HttpTool::new("t", "d", "http://127.0.0.1:1/unreachable", 1);
        let err = tool.execute(serde_json::json!({"query": "x"})).await.unwrap_err();
        assert!(err.starts_with("Request failed"));
    }
}
