//! Spreadsheet ETL 触发工具（Airflow REST API）
//!
//! 触发 DAG 运行 -> 按间隔轮询状态直到 success / failed 或超过最长等待 -> 成功时读取 XCom 摘要。
//! 内部是异步轮询，但对调用方表现为一次阻塞调用：返回结果或超时错误。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::EtlSection;
use crate::tools::{Tool, ToolOutput};

/// DAG 运行状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
    Other(String),
}

impl RunState {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => RunState::Queued,
            "running" => RunState::Running,
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            other => RunState::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed)
    }
}

/// ETL 触发工具
pub struct EtlTriggerTool {
    client: Client,
    name: String,
    base_url: String,
    dag_id: String,
    username: Option<String>,
    password: Option<String>,
    poll_interval: Duration,
    max_wait: Duration,
    summary_task_id: Option<String>,
    summary_key: String,
}

impl EtlTriggerTool {
    pub fn from_config(section: &EtlSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            name: section.name.clone(),
            base_url: section.base_url.trim_end_matches('/').to_string(),
            dag_id: section.dag_id.clone(),
            username: section.username.clone(),
            password: std::env::var(&section.password_env).ok(),
            poll_interval: Duration::from_secs(section.poll_interval_secs.max(1)),
            max_wait: Duration::from_secs(section.max_wait_secs),
            summary_task_id: section.summary_task_id.clone(),
            summary_key: section.summary_key.clone(),
        }
    }

    fn dag_runs_url(&self) -> String {
        format!("{}/api/v1/dags/{}/dagRuns", self.base_url, self.dag_id)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    async fn send_json(&self, req: RequestBuilder) -> Result<Value, String> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| format!("Airflow request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Airflow HTTP {status}: {}", body.chars().take(200).collect::<String>()));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("Airflow response is not JSON: {e}"))
    }

    async fn trigger(&self, conf: Value) -> Result<String, String> {
        let body = trigger_body(Utc::now(), conf);
        let resp = self
            .send_json(self.client.post(self.dag_runs_url()).json(&body))
            .await?;
        resp.get("dag_run_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| "Airflow did not return a dag_run_id".to_string())
    }

    async fn wait_for_completion(&self, run_id: &str) -> Result<RunState, String> {
        let url = format!("{}/{}", self.dag_runs_url(), run_id);
        let deadline = Instant::now() + self.max_wait;
        loop {
            let resp = self.send_json(self.client.get(&url)).await?;
            let state = RunState::parse(resp.get("state").and_then(|v| v.as_str()).unwrap_or(""));
            tracing::info!(run_id, ?state, "ETL DAG run state");
            if state.is_terminal() {
                return Ok(state);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(format!(
                    "ETL pipeline timeout: DAG run {run_id} still {state:?} after {}s",
                    self.max_wait.as_secs()
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_summary(&self, run_id: &str) -> Option<Value> {
        let task_id = self.summary_task_id.as_ref()?;
        let url = format!(
            "{}/{}/taskInstances/{}/xcomEntries/{}",
            self.dag_runs_url(),
            run_id,
            task_id,
            self.summary_key
        );
        match self.send_json(self.client.get(&url)).await {
            Ok(v) => v.get("value").cloned(),
            Err(e) => {
                tracing::warn!("ETL summary unavailable: {}", e);
                None
            }
        }
    }
}

/// 触发请求体：run id 与 logical_date 由当前 UTC 时间生成
fn trigger_body(now: DateTime<Utc>, args: Value) -> Value {
    serde_json::json!({
        "dag_run_id": format!("chatbot_trigger_{}", now.timestamp()),
        "logical_date": now.to_rfc3339(),
        "conf": {
            "source_trigger": "chatbot_request",
            "timestamp": now.timestamp(),
            "args": args,
        },
    })
}

/// 组装成功结果
fn success_output(dag_id: &str, run_id: &str, summary: Option<Value>) -> Value {
    let mut out = serde_json::json!({
        "status": "success",
        "dag_id": dag_id,
        "dag_run_id": run_id,
    });
    if let Some(s) = summary {
        out["summary"] = s;
    }
    out
}

#[async_trait]
impl Tool for EtlTriggerTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Trigger the spreadsheet ETL pipeline (pull latest spreadsheet data into the asset database) and return its summary. Args: {\"question\": \"optional context\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": []
        })
    }

    fn timeout_hint(&self) -> Option<Duration> {
        Some(self.max_wait + Duration::from_secs(60))
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let run_id = self.trigger(args).await?;
        tracing::info!(dag_id = %self.dag_id, run_id = %run_id, "ETL DAG triggered");
        match self.wait_for_completion(&run_id).await? {
            RunState::Success => {
                let summary = self.fetch_summary(&run_id).await;
                Ok(ToolOutput::Json(success_output(&self.dag_id, &run_id, summary)))
            }
            state => Err(format!(
                "ETL pipeline gagal dengan status {state:?} (DAG run {run_id})"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn section() -> EtlSection {
        EtlSection {
            name: "trigger_spreadsheet_etl_and_get_summary".into(),
            base_url: "http://airflow.local:8080/".into(),
            dag_id: "spreadsheet_etl".into(),
            username: None,
            password_env: "ICONNET_TEST_UNSET_PASSWORD".into(),
            poll_interval_secs: 0,
            max_wait_secs: 120,
            summary_task_id: Some("summarize".into()),
            summary_key: "return_value".into(),
        }
    }

    #[test]
    fn run_state_parsing() {
        assert_eq!(RunState::parse("success"), RunState::Success);
        assert!(RunState::parse("failed").is_terminal());
        assert!(!RunState::parse("running").is_terminal());
        assert_eq!(RunState::parse("up_for_retry"), RunState::Other("up_for_retry".into()));
    }

    #[test]
    fn config_normalises_url_and_interval() {
        let tool = EtlTriggerTool::from_config(&section());
        assert_eq!(
            tool.dag_runs_url(),
            "http://airflow.local:8080/api/v1/dags/spreadsheet_etl/dagRuns"
        );
        assert_eq!(tool.poll_interval, Duration::from_secs(1));
        assert_eq!(tool.timeout_hint(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn trigger_body_carries_run_id_and_logical_date() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let body = trigger_body(now, serde_json::json!({"question": "update data"}));
        assert_eq!(body["dag_run_id"], format!("chatbot_trigger_{}", now.timestamp()));
        assert_eq!(body["logical_date"], "2024-05-01T08:30:00+00:00");
        assert_eq!(body["conf"]["args"]["question"], "update data");
    }

    #[test]
    fn success_output_includes_summary_when_present() {
        let out = success_output("d", "r1", Some(serde_json::json!({"rows": 10})));
        assert_eq!(out["summary"]["rows"], 10);
        let out = success_output("d", "r1", None);
        assert!(out.get("summary").is_none());
    }
}
