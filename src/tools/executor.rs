//! 工具执行器
//!
//! 在超时内调用已注册工具，失败映射为 ToolTimeout / ToolExecutionFailed / UnknownTool，
//! 每次调用写一行 `tool_audit` JSON 日志。

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

const ARGS_PREVIEW_CHARS: usize = 200;

/// 每次工具调用的审计记录（以一行 JSON 写入日志）
#[derive(Debug, Serialize)]
struct ToolAudit<'a> {
    event: &'static str,
    tool: &'a str,
    ok: bool,
    outcome: &'static str,
    duration_ms: u64,
    args_preview: String,
}

impl ToolAudit<'_> {
    fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => tracing::info!(audit = %line, "tool"),
            Err(e) => tracing::warn!(tool = self.tool, error = %e, "audit serialisation failed"),
        }
    }
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具，成功时返回文本化结果
    ///
    /// 工具自带的超时提示只能放宽全局超时，不能收紧。
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let Some(tool) = self.registry.get(tool_name) else {
            tracing::warn!(tool = tool_name, "model requested an unregistered tool");
            return Err(AgentError::UnknownTool(tool_name.to_string()));
        };
        let limit = tool
            .timeout_hint()
            .map_or(self.timeout, |hint| hint.max(self.timeout));
        let preview = args_preview(&args);

        let started = Instant::now();
        let result = match timeout(limit, tool.execute(args)).await {
            Ok(Ok(output)) => Ok(output.into_text()),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(format!(
                "{tool_name} did not finish within {}s",
                limit.as_secs()
            ))),
        };

        ToolAudit {
            event: "tool_audit",
            tool: tool_name,
            ok: result.is_ok(),
            outcome: match &result {
                Ok(_) => "ok",
                Err(AgentError::ToolTimeout(_)) => "timeout",
                Err(_) => "error",
            },
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            args_preview: preview,
        }
        .emit();

        result
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let text = args.to_string();
    match text.char_indices().nth(ARGS_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolOutput};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<ToolOutput, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<ToolOutput, String> {
            Err("connection refused".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        reg.register(Failing);
        ToolExecutor::with_timeout(reg, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn timeout_maps_to_tool_timeout() {
        let err = executor().execute("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn failure_and_unknown_are_typed() {
        let ex = executor();
        assert_eq!(
            ex.execute("failing", Value::Null).await,
            Err(AgentError::ToolExecutionFailed("connection refused".into()))
        );
        assert_eq!(
            ex.execute("ghost", Value::Null).await,
            Err(AgentError::UnknownTool("ghost".into()))
        );
    }

    #[test]
    fn long_args_are_truncated() {
        let args = serde_json::json!({ "q": "x".repeat(500) });
        let preview = args_preview(&args);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }
}
