//! Headless Agent 运行时
//!
//! 对外入口 run_turn(thread_id, user_text)：按线程加锁，读检查点，追加用户消息，
//! 跑一轮编排，成功后写回检查点并返回最终回答。被取消或出错的一轮不会写回。
//! AgentBuilder 允许替换 LLM、工具注册表与检查点存储（测试与嵌入场景）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ToolsSection};
use crate::core::{AgentError, ConversationState, RecoveryEngine};
use crate::llm::{
    create_deepseek_client, deepseek_api_key, LlmClient, MockLlmClient, OpenAiClient,
};
use crate::memory::{create_checkpoint_store, CheckpointStore, ThreadLocks};
use crate::react::events::send_event;
use crate::react::{
    run_turn_loop, GenerationNode, ReflectionNode, RetryPolicy, TurnEvent, TurnOutcome,
    TurnSession,
};
use crate::tools::{EtlTriggerTool, HttpTool, ToolExecutor, ToolRegistry};

/// 按配置选择 LLM 后端；没有可用 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek" if deepseek_api_key().is_some() => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(create_deepseek_client(&cfg.llm))
        }
        "openai" if openai_key.is_some() => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, openai_key.as_deref())
                    .with_temperature(cfg.llm.temperature),
            )
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 根据 [tools] 配置注册远程 HTTP 工具与 ETL 触发器
pub fn create_registry_from_config(tools: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for remote in &tools.remote {
        registry.register(HttpTool::from_config(remote, tools.tool_timeout_secs));
    }
    if let Some(etl) = &tools.etl {
        registry.register(EtlTriggerTool::from_config(etl));
    }
    if registry.is_empty() {
        tracing::warn!("No tools configured; every turn will be answered without tool data");
    }
    registry
}

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            store: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let cfg = self.config;
        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&cfg));
        let registry = self
            .registry
            .unwrap_or_else(|| create_registry_from_config(&cfg.tools));
        let store = self
            .store
            .unwrap_or_else(|| create_checkpoint_store(&cfg.checkpoint.backend, &cfg.checkpoint.dir));

        let generation = GenerationNode::new(
            llm,
            cfg.orchestrator.system_prompt.as_deref(),
            &registry,
            Duration::from_secs(cfg.llm.timeouts.request),
        );
        let reflection = ReflectionNode::from_config(&cfg.reflection)?;
        tracing::info!(
            tools = ?registry.tool_names(),
            max_retries = cfg.orchestrator.max_retries,
            max_tool_rounds = cfg.orchestrator.max_tool_rounds,
            "agent ready"
        );

        Ok(Agent {
            generation,
            executor: ToolExecutor::new(registry, cfg.tools.tool_timeout_secs),
            reflection,
            policy: RetryPolicy::from(&cfg.orchestrator),
            store,
            locks: ThreadLocks::new(),
            recovery: RecoveryEngine::new(),
        })
    }
}

/// 可在多个会话间共享的 Agent（节点无状态，状态全部在检查点里）
pub struct Agent {
    generation: GenerationNode,
    executor: ToolExecutor,
    reflection: ReflectionNode,
    policy: RetryPolicy,
    store: Arc<dyn CheckpointStore>,
    locks: ThreadLocks,
    recovery: RecoveryEngine,
}

impl Agent {
    pub fn from_config(cfg: AppConfig) -> Result<Self, AgentError> {
        AgentBuilder::new(cfg).build()
    }

    pub fn builder(cfg: AppConfig) -> AgentBuilder {
        AgentBuilder::new(cfg)
    }

    /// 处理一条用户消息，总是返回可展示的文本（错误转成道歉语）
    pub async fn run_turn(&self, thread_id: &str, user_text: &str) -> String {
        match self.try_run_turn(thread_id, user_text).await {
            Ok(outcome) => outcome.answer,
            Err(e) => {
                if e.is_invariant_violation() {
                    tracing::error!(thread_id, error = %e, "routing invariant violated");
                } else {
                    tracing::warn!(thread_id, error = %e, "turn failed");
                }
                self.recovery.user_message(&e)
            }
        }
    }

    pub async fn try_run_turn(
        &self,
        thread_id: &str,
        user_text: &str,
    ) -> Result<TurnOutcome, AgentError> {
        self.run_turn_with(thread_id, user_text, CancellationToken::new(), None)
            .await
    }

    /// 带取消令牌与事件通道的完整入口
    pub async fn run_turn_with(
        &self,
        thread_id: &str,
        user_text: &str,
        cancel_token: CancellationToken,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
    ) -> Result<TurnOutcome, AgentError> {
        let _guard = self.locks.acquire(thread_id).await;

        let mut state = self.store.load(thread_id).await?.unwrap_or_default();
        state.begin_turn(user_text);
        send_event(
            event_tx,
            TurnEvent::TurnStarted {
                thread_id: thread_id.to_string(),
                user_text: user_text.to_string(),
            },
        );
        tracing::info!(thread_id, history = state.len(), "turn started");

        let mut session = TurnSession::new(
            &self.generation,
            &self.executor,
            &self.reflection,
            self.policy,
        )
        .with_cancel_token(cancel_token);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }

        let outcome = run_turn_loop(&session, &mut state).await?;
        self.store.save(thread_id, &state).await?;
        tracing::info!(
            thread_id,
            retry_count = outcome.retry_count,
            quality = ?outcome.quality,
            "turn finished"
        );
        Ok(outcome)
    }

    /// 读取线程的已保存状态
    pub async fn load_state(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        self.store.load(thread_id).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.generation.token_usage()
    }
}
