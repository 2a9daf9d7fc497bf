//! Generation 节点：调用 LLM，产生一条 assistant 消息
//!
//! 模型以纯文本回复；若回复中含合法的工具调用 JSON（```json 代码块，或第一个 `{` 到最后一个 `}`），
//! 解析为一个或多个 ToolCall，否则整段作为直接回答。支持两种形状：
//! `{"tool_calls": [{"tool": "...", "args": {...}}]}` 与单个 `{"tool": "...", "args": {...}}`。
//!
//! 渲染给模型的上下文：system prompt（含工具列表与调用格式）+ 对话记录 +（可选）反思指导。
//! 工具结果以 `Observation from <tool> [<call_id>]: ...` 的 user 消息呈现。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{AgentError, ConversationState, RecoveryEngine, ReflectionVerdict};
use crate::llm::LlmClient;
use crate::memory::{Message, Role, ToolCall};
use crate::tools::{tool_call_schema_json, ToolRegistry};

/// 内置 system prompt（可被配置覆盖）
pub const DEFAULT_SYSTEM_PROMPT: &str = "Anda adalah asisten ICONNET yang membantu tim internal menjawab pertanyaan \
tentang data aset jaringan, pelanggan, dokumentasi teknis, dan informasi umum. \
Gunakan tool yang tersedia untuk mendapatkan data sebelum menjawab; jangan mengarang angka. \
Jawab selalu dalam Bahasa Indonesia yang jelas dan ringkas.";

/// 单个调用的原始格式
#[derive(Debug, Deserialize)]
struct RawCall {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReply {
    Many { tool_calls: Vec<RawCall> },
    One(RawCall),
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    /// 直接回答用户
    Response(String),
    /// 需要执行工具；content 为 JSON 之前的说明文字（可能为空）
    ToolCalls { content: String, calls: Vec<ToolCall> },
}

/// 从模型文本中提取 JSON 片段及其起始位置
fn extract_json(text: &str) -> Option<(usize, &str)> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        let body = rest.find("```").map_or(rest, |end| &rest[..end]);
        return Some((start, body.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| (start, &text[start..=end]))
}

/// 解析模型输出：含合法工具调用 JSON 时为 ToolCalls，否则为 Response
pub fn parse_model_output(output: &str) -> GenerationOutput {
    let trimmed = output.trim();
    let Some((start, json_str)) = extract_json(trimmed) else {
        return GenerationOutput::Response(trimmed.to_string());
    };
    let raw = match serde_json::from_str::<RawReply>(json_str) {
        Ok(RawReply::Many { tool_calls }) => tool_calls,
        Ok(RawReply::One(call)) => vec![call],
        Err(_) => return GenerationOutput::Response(trimmed.to_string()),
    };
    let calls: Vec<ToolCall> = raw
        .into_iter()
        .filter(|c| !c.tool.trim().is_empty())
        .map(|c| {
            let args = if c.args.is_null() {
                serde_json::json!({})
            } else {
                c.args
            };
            ToolCall::new(c.tool.trim(), args)
        })
        .collect();
    if calls.is_empty() {
        return GenerationOutput::Response(trimmed.to_string());
    }
    GenerationOutput::ToolCalls {
        content: trimmed[..start].trim().to_string(),
        calls,
    }
}

/// 工具调用消息在上下文中的 JSON 形式（与解析格式一致）
fn calls_as_json(calls: &[ToolCall]) -> String {
    let list: Vec<serde_json::Value> = calls
        .iter()
        .map(|c| serde_json::json!({ "tool": c.tool_name, "args": c.arguments }))
        .collect();
    serde_json::json!({ "tool_calls": list }).to_string()
}

/// 反思指导：仅在重试时附加
fn guidance_message(verdict: &ReflectionVerdict) -> Message {
    let suggested = verdict.suggested_tool.as_deref().unwrap_or("-");
    let text = if verdict.continuation {
        format!(
            "GUIDANCE FROM REFLECTION SYSTEM:\n\
             - Progress so far: {}\n\
             - Next tool: {suggested}\n\
             - Reasoning: {}\n\n\
             Continue with the next tool using the data you already have, then answer the user.",
            verdict.critique, verdict.reasoning
        )
    } else {
        format!(
            "IMPORTANT GUIDANCE FROM REFLECTION SYSTEM:\n\
             - Previous tool was incorrect: {}\n\
             - Recommended tool: {suggested}\n\
             - Reasoning: {}\n\n\
             Please carefully consider this guidance when selecting the appropriate tool for this question.\n\
             Make sure to use the suggested tool if it's relevant to the user's question.",
            verdict.critique, verdict.reasoning
        )
    };
    Message::system(text)
}

const ANSWER_ONLY_NOTICE: &str = "Tools are no longer available for this request. \
Answer the user now in plain text, using only the tool results above. Do not output JSON.";

pub struct GenerationNode {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    request_timeout: Duration,
    recovery: RecoveryEngine,
}

impl GenerationNode {
    /// system prompt 在创建时拼好工具列表与调用格式
    pub fn new(
        llm: Arc<dyn LlmClient>,
        base_prompt: Option<&str>,
        registry: &ToolRegistry,
        request_timeout: Duration,
    ) -> Self {
        let base = base_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let system_prompt = if registry.is_empty() {
            base.to_string()
        } else {
            format!(
                "{base}\n\nAvailable tools:\n{}\n\n\
                 To call tools, reply ONLY with JSON matching this schema (one or more calls, executed in order):\n{}\n\
                 Otherwise answer the user directly in plain text.",
                registry.to_schema_json(),
                tool_call_schema_json()
            )
        };
        Self {
            llm,
            system_prompt,
            request_timeout,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 渲染发送给模型的上下文
    pub fn render_for_model(&self, state: &ConversationState, answer_only: bool) -> Vec<Message> {
        let mut out = Vec::with_capacity(state.len() + 3);
        out.push(Message::system(self.system_prompt.clone()));
        for m in state.messages() {
            let rendered = match m.role {
                Role::Tool => Message::user(format!(
                    "Observation from {} [{}]: {}",
                    m.tool_name.as_deref().unwrap_or("tool"),
                    m.tool_call_id.as_deref().unwrap_or("-"),
                    m.content
                )),
                Role::Assistant if m.has_tool_calls() => {
                    let json = calls_as_json(&m.tool_calls);
                    if m.content.is_empty() {
                        Message::assistant(json)
                    } else {
                        Message::assistant(format!("{}\n{json}", m.content))
                    }
                }
                _ => Message {
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                    tool_name: None,
                    ..m.clone()
                },
            };
            out.push(rendered);
        }
        if let Some(verdict) = state.reflection.as_ref().filter(|v| v.wants_retry()) {
            if state.retry_count > 0 {
                out.push(guidance_message(verdict));
            }
        }
        if answer_only {
            out.push(Message::system(ANSWER_ONLY_NOTICE));
        }
        out
    }

    /// 运行一次生成，恰好追加一条 assistant 消息
    ///
    /// LLM 失败或超时不会返回错误：追加一条道歉回答，交给反思决定是否重试。
    /// answer_only 时忽略模型给出的任何工具调用。
    pub async fn run(
        &self,
        state: &mut ConversationState,
        answer_only: bool,
    ) -> Result<GenerationOutcome, AgentError> {
        if state.is_empty() {
            return Err(AgentError::EmptyState);
        }
        let context = self.render_for_model(state, answer_only);

        let reply = match tokio::time::timeout(self.request_timeout, self.llm.complete(&context)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Err("empty reply".to_string()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!(
                "request timed out after {}s",
                self.request_timeout.as_secs()
            )),
        };
        let text = match reply {
            Ok(text) => text,
            Err(reason) => {
                tracing::warn!(error = %reason, "generation failed, replying with apology");
                state.push(Message::assistant(self.recovery.generation_failure()));
                return Ok(GenerationOutcome::Failed(reason));
            }
        };

        let message = match parse_model_output(&text) {
            GenerationOutput::ToolCalls { content, calls } if !answer_only => {
                tracing::info!(
                    tools = ?calls.iter().map(|c| c.tool_name.as_str()).collect::<Vec<_>>(),
                    "model requested tools"
                );
                Message::assistant_with_calls(content, calls)
            }
            GenerationOutput::ToolCalls { content, .. } => {
                tracing::warn!("tool calls ignored in answer-only mode");
                if content.is_empty() {
                    Message::assistant(self.recovery.generation_failure())
                } else {
                    Message::assistant(content)
                }
            }
            GenerationOutput::Response(answer) => Message::assistant(answer),
        };
        state.push(message);
        Ok(GenerationOutcome::Generated)
    }
}

/// 一次生成的结果（消息已写入状态）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated,
    /// LLM 失败，已写入道歉回答
    Failed(String),
}
