//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ICONNET__*` 覆盖（双下划线表示嵌套，如 `ICONNET__LLM__PROVIDER=openai`）。
//! API Key 不进配置文件，只从 `DEEPSEEK_API_KEY` / `OPENAI_API_KEY` 读取。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::names;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub reflection: ReflectionSection,
    pub tools: ToolsSection,
    pub checkpoint: CheckpointSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// REPL 默认使用的会话线程 ID
    pub thread_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            thread_id: "default".to_string(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            temperature: Some(0.0),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次 LLM 请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [orchestrator] 段：重试上限与每次尝试的工具轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_retries: u32,
    /// 单次尝试内 GENERATE -> EXECUTE_TOOLS 的最大轮数，超过后下一次生成只允许直接回答
    pub max_tool_rounds: u32,
    /// 覆盖内置 system prompt
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_tool_rounds: 4,
            system_prompt: None,
        }
    }
}

/// [reflection] 段：错误标记、兜底工具与有序意图规则表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionSection {
    pub error_markers: Vec<String>,
    /// 未知类别且未使用任何工具时建议的工具
    pub fallback_tool: String,
    /// 仅做规划、不算「真正执行」的工具
    pub non_execution_tools: Vec<String>,
    /// 有序规则表，先匹配者胜
    pub rules: Vec<IntentRuleSection>,
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            error_markers: ["error", "gagal", "tidak dapat", "failed", "connection", "timeout"]
                .into_iter()
                .map(String::from)
                .collect(),
            fallback_tool: names::WEB_SEARCH.to_string(),
            non_execution_tools: vec![names::INTENT_ANALYSIS.to_string()],
            rules: default_intent_rules(),
        }
    }
}

/// 单条意图规则（[[reflection.rules]]）
#[derive(Debug, Clone, Deserialize)]
pub struct IntentRuleSection {
    pub category: String,
    /// 至少命中其一
    pub any_of: Vec<String>,
    /// 非空时也必须至少命中其一
    #[serde(default)]
    pub also_any_of: Vec<String>,
    /// 命中任何一个则规则不成立
    #[serde(default)]
    pub none_of: Vec<String>,
    pub requirement: RequirementSection,
}

/// 类别对工具的要求
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementSection {
    /// 任一工具即可满足；第一个为建议工具
    Tool { tools: Vec<String> },
    /// 先用 first 中任一工具取数，再用 then
    Sequence { first: Vec<String>, then: String },
    None,
}

fn kws(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

const VIZ_KEYWORDS: &[&str] = &[
    "grafik", "chart", "visualisasi", "pie", "bar", "diagram", "plot", "pie chart", "buat grafik",
];

/// 内置规则表（顺序即优先级）
pub fn default_intent_rules() -> Vec<IntentRuleSection> {
    vec![
        IntentRuleSection {
            category: "SPREADSHEET".into(),
            any_of: kws(&[
                "spreadsheet", "excel", "upload", "etl", "file", "ambil data", "ambil file",
                "proses data", "update data",
            ]),
            also_any_of: Vec::new(),
            none_of: Vec::new(),
            requirement: RequirementSection::Tool {
                tools: vec![names::ETL_TRIGGER.into()],
            },
        },
        IntentRuleSection {
            category: "INTERNET_SEARCH".into(),
            any_of: kws(&[
                "tesla", "juara", "ucl", "berita", "cuaca", "internet", "informasi umum",
                "cari di internet", "carikan di internet", "tahun berapa terbentuk", "didirikan",
                "kapan", "siapa pendiri", "founded", "established",
            ]),
            also_any_of: Vec::new(),
            none_of: kws(&["spreadsheet", "data internal", "ambil data", "file"]),
            requirement: RequirementSection::Tool {
                tools: vec![names::WEB_SEARCH.into(), names::ENHANCED_WEB_RESEARCH.into()],
            },
        },
        IntentRuleSection {
            category: "VISUALIZATION_WITH_DATA".into(),
            any_of: kws(VIZ_KEYWORDS),
            also_any_of: kws(&[
                "berapa", "jumlah", "bandingkan", "total", "olt", "pelanggan", "kota", "data",
            ]),
            none_of: Vec::new(),
            requirement: RequirementSection::Sequence {
                first: vec![names::QUERY_ASSET_DATABASE.into(), names::SQL_AGENT.into()],
                then: names::CREATE_VISUALIZATION.into(),
            },
        },
        IntentRuleSection {
            category: "VISUALIZATION".into(),
            any_of: kws(VIZ_KEYWORDS),
            also_any_of: Vec::new(),
            none_of: Vec::new(),
            requirement: RequirementSection::Tool {
                tools: vec![names::CREATE_VISUALIZATION.into()],
            },
        },
        IntentRuleSection {
            category: "DATA_DATABASE".into(),
            any_of: kws(&[
                "berapa", "total", "jumlah", "bandingkan", "hitung", "cari data", "data",
                "pelanggan", "brand", "kota", "cluster", "lokasi", "aset", "fat id",
            ]),
            also_any_of: Vec::new(),
            none_of: Vec::new(),
            requirement: RequirementSection::Tool {
                tools: vec![names::QUERY_ASSET_DATABASE.into(), names::SQL_AGENT.into()],
            },
        },
        IntentRuleSection {
            category: "TECHNICAL_DOCS".into(),
            any_of: kws(&[
                "apa itu", "perbedaan", "hubungan", "cara instalasi", "panduan", "sop",
                "dokumentasi", "konfigurasi", "jelaskan", "definisi", "pengertian",
            ]),
            also_any_of: Vec::new(),
            none_of: Vec::new(),
            requirement: RequirementSection::Tool {
                tools: vec![names::SEARCH_DOCUMENTS.into()],
            },
        },
    ]
}

/// [tools] 段：工具超时、远程 HTTP 工具与 ETL 触发器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub remote: Vec<RemoteToolSection>,
    pub etl: Option<EtlSection>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            remote: Vec::new(),
            etl: None,
        }
    }
}

/// [[tools.remote]]：把参数 POST 到 endpoint 的工具
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSection {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    /// 参数 JSON Schema；未设置时不限
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// [tools.etl]：Airflow 风格的 DAG 触发与轮询
#[derive(Debug, Clone, Deserialize)]
pub struct EtlSection {
    #[serde(default = "default_etl_name")]
    pub name: String,
    pub base_url: String,
    pub dag_id: String,
    pub username: Option<String>,
    /// 存放密码的环境变量名
    #[serde(default = "default_etl_password_env")]
    pub password_env: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    pub summary_task_id: Option<String>,
    #[serde(default = "default_summary_key")]
    pub summary_key: String,
}

fn default_etl_name() -> String {
    names::ETL_TRIGGER.to_string()
}

fn default_etl_password_env() -> String {
    "AIRFLOW_PASSWORD".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_wait_secs() -> u64 {
    300
}

fn default_summary_key() -> String {
    "return_value".to_string()
}

/// [checkpoint] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    /// memory / file
    pub backend: String,
    pub dir: PathBuf,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            dir: PathBuf::from("data/checkpoints"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ICONNET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ICONNET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ICONNET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_retries, 2);
        assert_eq!(cfg.app.thread_id, "default");
        assert_eq!(cfg.checkpoint.backend, "memory");
        assert_eq!(cfg.reflection.rules.len(), 6);
        assert_eq!(cfg.reflection.rules[0].category, "SPREADSHEET");
    }

    #[test]
    fn toml_file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iconnet.toml");
        std::fs::write(
            &path,
            r#"
[orchestrator]
max_retries = 3

[checkpoint]
backend = "file"
dir = "/tmp/cp"

[[reflection.rules]]
category = "ONLY"
any_of = ["halo"]
requirement = { kind = "tool", tools = ["echo"] }

[[tools.remote]]
name = "query_asset_database"
description = "Asset DB"
endpoint = "http://localhost:9000/query"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.orchestrator.max_retries, 3);
        assert_eq!(cfg.orchestrator.max_tool_rounds, 4);
        assert_eq!(cfg.checkpoint.backend, "file");
        assert_eq!(cfg.reflection.rules.len(), 1);
        assert_eq!(
            cfg.reflection.rules[0].requirement,
            RequirementSection::Tool { tools: vec!["echo".into()] }
        );
        assert_eq!(cfg.tools.remote.len(), 1);
        assert!(cfg.tools.etl.is_none());
    }
}
