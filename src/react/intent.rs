//! 意图分类：按有序规则表把用户问题映射到类别与工具要求
//!
//! 关键词从词首匹配，允许带常见印尼语后缀（grafiknya、hitungkan），
//! 但不匹配词中子串，避免 "bar" 命中 "terbaru"；
//! 规则按顺序评估，第一条成立的规则胜出，都不成立时为 UNKNOWN。

use regex::Regex;

use crate::config::{IntentRuleSection, RequirementSection};
use crate::core::AgentError;

/// 关键词后可跟的后缀；不含 -an，否则 "sop" 会命中 "sopan"
const INFLECTION_SUFFIXES: &str = "nya|kan|lah|kah|ku|mu";

pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// 类别对工具使用的要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequirement {
    /// 使用 tools 中任一工具即满足；tools[0] 为建议工具
    Tool { tools: Vec<String> },
    /// 先用 first 中任一工具取数，再用 then
    Sequence { first: Vec<String>, then: String },
    /// 无特定要求
    None,
}

impl From<&RequirementSection> for ToolRequirement {
    fn from(section: &RequirementSection) -> Self {
        match section {
            RequirementSection::Tool { tools } if !tools.is_empty() => ToolRequirement::Tool {
                tools: tools.clone(),
            },
            RequirementSection::Sequence { first, then } if !first.is_empty() => {
                ToolRequirement::Sequence {
                    first: first.clone(),
                    then: then.clone(),
                }
            }
            _ => ToolRequirement::None,
        }
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMatch {
    pub category: String,
    pub requirement: ToolRequirement,
}

impl IntentMatch {
    fn unknown() -> Self {
        Self {
            category: UNKNOWN_CATEGORY.to_string(),
            requirement: ToolRequirement::None,
        }
    }
}

/// 编译后的关键词集合：一个「词首 + 可选后缀 + 词尾」交替正则
#[derive(Debug, Clone)]
struct KeywordSet(Option<Regex>);

impl KeywordSet {
    fn compile(keywords: &[String]) -> Result<Self, AgentError> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k.to_lowercase()))
            .collect();
        if alternatives.is_empty() {
            return Ok(Self(None));
        }
        let pattern = format!(
            r"(?i)\b(?:{})(?:{INFLECTION_SUFFIXES})?\b",
            alternatives.join("|")
        );
        Regex::new(&pattern)
            .map(|re| Self(Some(re)))
            .map_err(|e| AgentError::ConfigError(format!("invalid intent keywords: {e}")))
    }

    fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    fn matches(&self, text: &str) -> bool {
        self.0.as_ref().is_some_and(|re| re.is_match(text))
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    category: String,
    any_of: KeywordSet,
    also_any_of: KeywordSet,
    none_of: KeywordSet,
    requirement: ToolRequirement,
}

impl CompiledRule {
    /// any_of 为空的规则匹配一切（可作为兜底规则放在表尾）
    fn applies(&self, text: &str) -> bool {
        (self.any_of.is_empty() || self.any_of.matches(text))
            && (self.also_any_of.is_empty() || self.also_any_of.matches(text))
            && !self.none_of.matches(text)
    }
}

/// 意图分类器
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<CompiledRule>,
}

impl IntentClassifier {
    pub fn new(rules: &[IntentRuleSection]) -> Result<Self, AgentError> {
        let rules = rules
            .iter()
            .map(|r| {
                Ok(CompiledRule {
                    category: r.category.clone(),
                    any_of: KeywordSet::compile(&r.any_of)?,
                    also_any_of: KeywordSet::compile(&r.also_any_of)?,
                    none_of: KeywordSet::compile(&r.none_of)?,
                    requirement: ToolRequirement::from(&r.requirement),
                })
            })
            .collect::<Result<Vec<_>, AgentError>>()?;
        Ok(Self { rules })
    }

    pub fn classify(&self, text: &str) -> IntentMatch {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.applies(&text))
            .map(|r| IntentMatch {
                category: r.category.clone(),
                requirement: r.requirement.clone(),
            })
            .unwrap_or_else(IntentMatch::unknown)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.category.as_str())
    }
}
