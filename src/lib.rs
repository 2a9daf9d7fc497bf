//! ICONNET Agent - 工具调用编排引擎
//!
//! 模块划分：
//! - **agent**: 对外入口 run_turn（按线程加锁、读写检查点、跑一轮编排）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、错误类型、面向用户的错误恢复
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 对话消息类型与检查点存储
//! - **observability**: tracing 日志初始化
//! - **react**: Generation / Tool / Reflection 节点、意图分类、路由与主循环
//! - **tools**: 工具 trait、注册表、执行器与内置远程工具（HTTP / ETL）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, AgentBuilder};
pub use core::{AgentError, ConversationState};
