//! Reflection 节点：判断本轮的工具使用是否符合问题类别的要求
//!
//! 纯规则评估，不调用 LLM：
//! - 用意图分类器得到类别与工具要求
//! - 统计本轮（最近一条用户消息之后）的工具消息
//! - 按要求给出 FINISH / RETRY 结论，以及重试时建议的工具
//!
//! 评估永远不会失败；找不到问题或回答时直接给出 RETRY 结论。

use crate::config::{default_intent_rules, ReflectionSection};
use crate::core::{AgentError, ConversationState, ReflectionVerdict};
use crate::memory::{Message, Role};
use crate::react::intent::{IntentClassifier, ToolRequirement, UNKNOWN_CATEGORY};

/// 工具结果中错误片段的最大展示字符数
const ERROR_EXCERPT_CHARS: usize = 100;
/// 同一工具本轮失败达到该次数后，若类别有备选工具则建议换用
const SWITCH_AFTER_FAILURES: usize = 2;

/// 本轮的一次工具使用
#[derive(Debug, Clone)]
struct ToolUse<'a> {
    name: &'a str,
    content: &'a str,
}

pub struct ReflectionNode {
    classifier: IntentClassifier,
    error_markers: Vec<String>,
    fallback_tool: String,
    non_execution_tools: Vec<String>,
}

impl ReflectionNode {
    /// 规则表为空时使用内置规则
    pub fn from_config(section: &ReflectionSection) -> Result<Self, AgentError> {
        let classifier = if section.rules.is_empty() {
            IntentClassifier::new(&default_intent_rules())?
        } else {
            IntentClassifier::new(&section.rules)?
        };
        Ok(Self {
            classifier,
            error_markers: section
                .error_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            fallback_tool: section.fallback_tool.clone(),
            non_execution_tools: section.non_execution_tools.clone(),
        })
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// 评估当前状态，返回新的反思结论（调用方负责写回 state.reflection）
    pub fn evaluate(&self, state: &ConversationState) -> ReflectionVerdict {
        let Some(question) = state.last_user_message() else {
            return ReflectionVerdict::retry(UNKNOWN_CATEGORY, "No user question found", None);
        };
        let has_answer = state
            .turn_messages()
            .iter()
            .any(|m| m.role == Role::Assistant);
        if !has_answer {
            return ReflectionVerdict::retry(UNKNOWN_CATEGORY, "No AI response found", None);
        }

        let intent = self.classifier.classify(&question.content);
        let uses = tool_uses(state.turn_messages());
        let category = intent.category.as_str();

        let verdict = match &intent.requirement {
            ToolRequirement::Tool { tools } => self.check_tool(category, tools, &uses),
            ToolRequirement::Sequence { first, then } => {
                self.check_sequence(category, first, then, &uses)
            }
            ToolRequirement::None => self.check_unrestricted(category, &uses),
        };
        tracing::debug!(
            category,
            tools_used = ?names_of(&uses),
            sufficient = verdict.is_sufficient,
            critique = %verdict.critique,
            "reflection"
        );
        verdict
    }

    fn check_tool(&self, category: &str, tools: &[String], uses: &[ToolUse<'_>]) -> ReflectionVerdict {
        let primary = tools[0].clone();
        if uses.is_empty() {
            return ReflectionVerdict::retry(
                category,
                format!("FATAL ERROR: Tidak menggunakan tool apapun untuk kategori {category}!"),
                Some(primary),
            );
        }

        let Some(last_ok) = uses.iter().rev().find(|u| tools.iter().any(|t| t == u.name)) else {
            return ReflectionVerdict::retry(
                category,
                format!(
                    "WRONG TOOL: Kategori {category} memerlukan {primary}, tapi menggunakan {:?}",
                    names_of(uses)
                ),
                Some(primary),
            );
        };

        if self.is_error(last_ok.content) {
            let failures = uses
                .iter()
                .filter(|u| u.name == last_ok.name && self.is_error(u.content))
                .count();
            let suggested = if failures >= SWITCH_AFTER_FAILURES {
                tools
                    .iter()
                    .find(|t| t.as_str() != last_ok.name)
                    .cloned()
                    .unwrap_or_else(|| last_ok.name.to_string())
            } else {
                last_ok.name.to_string()
            };
            return ReflectionVerdict::retry(
                category,
                format!(
                    "Tool {} used correctly but returned error: {}...",
                    last_ok.name,
                    excerpt(last_ok.content)
                ),
                Some(suggested),
            );
        }

        ReflectionVerdict::finish(
            category,
            format!("CORRECT: Tool {} tepat untuk kategori {category}", last_ok.name),
        )
    }

    /// 两步流程：first 中任一工具必须出现在 then 之前
    fn check_sequence(
        &self,
        category: &str,
        first: &[String],
        then: &str,
        uses: &[ToolUse<'_>],
    ) -> ReflectionVerdict {
        let primary = first[0].clone();
        if uses.is_empty() {
            return ReflectionVerdict::retry(
                category,
                format!("FATAL ERROR: Tidak menggunakan tool apapun untuk kategori {category}!"),
                Some(primary),
            );
        }

        let is_data = |u: &ToolUse<'_>| first.iter().any(|t| t == u.name);
        let first_data = uses.iter().position(|u| is_data(u));
        let last_then = uses.iter().rposition(|u| u.name == then);

        match (first_data, last_then) {
            (Some(d), Some(v)) if d < v => {
                // 图表所依赖的数据：图表之前最近一次数据工具结果
                let data = uses[..v].iter().rev().find(|u| is_data(u));
                match data {
                    Some(data) if self.is_error(data.content) => failed_use(category, data),
                    _ if self.is_error(uses[v].content) => failed_use(category, &uses[v]),
                    _ => ReflectionVerdict::finish(
                        category,
                        "PERFECT: Complete visualization flow - data + chart created",
                    ),
                }
            }
            (_, Some(_)) => ReflectionVerdict::retry(
                category,
                format!("WRONG ORDER: Created visualization without data. Need {primary} first"),
                Some(primary),
            ),
            (Some(_), None) => {
                let last_data = uses.iter().rev().find(|u| is_data(u));
                match last_data {
                    Some(data) if self.is_error(data.content) => failed_use(category, data),
                    _ => ReflectionVerdict::proceed(
                        category,
                        format!(
                            "GOOD PROGRESS: Data retrieved with {:?}, now need {then} for chart",
                            names_of(uses)
                        ),
                        then.to_string(),
                    ),
                }
            }
            (None, None) => ReflectionVerdict::retry(
                category,
                format!(
                    "WRONG TOOL: Visualization with data needs {primary} + {then}, got {:?}",
                    names_of(uses)
                ),
                Some(primary),
            ),
        }
    }

    /// 未知类别（或规则未限定工具）：至少要用过一个真正执行的工具
    fn check_unrestricted(&self, category: &str, uses: &[ToolUse<'_>]) -> ReflectionVerdict {
        if uses.is_empty() {
            return ReflectionVerdict::retry(
                category,
                format!(
                    "UNKNOWN CATEGORY: No tools used - forcing {} as fallback",
                    self.fallback_tool
                ),
                Some(self.fallback_tool.clone()),
            );
        }
        let executed = uses
            .iter()
            .any(|u| !self.non_execution_tools.iter().any(|t| t == u.name));
        if !executed {
            return ReflectionVerdict::retry(
                category,
                "UNKNOWN CATEGORY: Only intent analysis used - need execution tool as fallback",
                Some(self.fallback_tool.clone()),
            );
        }
        ReflectionVerdict::finish(
            category,
            format!("UNKNOWN CATEGORY: Tools used {:?} - proceeding", names_of(uses)),
        )
    }

    fn is_error(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.error_markers.iter().any(|m| lower.contains(m.as_str()))
    }
}

fn tool_uses(turn: &[Message]) -> Vec<ToolUse<'_>> {
    turn.iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| {
            m.tool_name.as_deref().map(|name| ToolUse {
                name,
                content: m.content.as_str(),
            })
        })
        .collect()
}

/// 工具被正确选用但结果带错误标记：重试同一工具
fn failed_use(category: &str, tool: &ToolUse<'_>) -> ReflectionVerdict {
    ReflectionVerdict::retry(
        category,
        format!(
            "Tool {} used correctly but returned error: {}...",
            tool.name,
            excerpt(tool.content)
        ),
        Some(tool.name.to_string()),
    )
}

fn names_of<'a>(uses: &[ToolUse<'a>]) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::new();
    for u in uses {
        if !names.contains(&u.name) {
            names.push(u.name);
        }
    }
    names
}

fn excerpt(content: &str) -> String {
    content.to_lowercase().chars().take(ERROR_EXCERPT_CHARS).collect()
}
