//! LLM客户端 - 提供统一的推理服务接口

use anyhow::Result;
use async_trait::async_trait;

use crate::config::LLMConfig;
use crate::error::ReasoningError;
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

mod providers;
mod scripted;
pub mod types;

pub use scripted::ScriptedReasoner;

use providers::ProviderClient;
use types::{ConversationTurn, ModelReply, ModelTier, ReasoningRequest};

/// 推理服务：接收对话与工具描述，返回工具调用请求或最终文本
///
/// 返回内容不可信，调用方必须自行校验。
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ModelReply, ReasoningError>;
}

/// 带超时与指数退避地调用推理服务
pub async fn respond_with_retry(
    service: &dyn ReasoningService,
    request: &ReasoningRequest,
    policy: &RetryPolicy,
) -> Result<ModelReply, ReasoningError> {
    let timeout_secs = policy.timeout.as_secs();
    retry_with_backoff(
        "调用模型服务",
        policy,
        ReasoningError::is_retryable,
        || ReasoningError::Timeout(timeout_secs),
        || service.respond(request),
    )
    .await
    .map_err(|exhausted| exhausted.last)
}

/// LLM客户端 - 基于rig的推理服务实现
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    client: ProviderClient,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = ProviderClient::new(&config)?;
        Ok(Self { client, config })
    }

    /// 模型调用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.retry_attempts,
            self.config.retry_delay_ms,
            self.config.timeout_seconds,
        )
    }

    fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Efficient => &self.config.model_efficient,
            ModelTier::Powerful => &self.config.model_powerful,
        }
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<()> {
        tracing::info!("🔄 正在检查模型连接...");
        let request = ReasoningRequest {
            system_prompt: "You are a helpful assistant.".to_string(),
            conversation: vec![ConversationTurn::user("Hello")],
            tools: Vec::new(),
            tier: ModelTier::Efficient,
        };
        match respond_with_retry(self, &request, &self.retry_policy()).await {
            Ok(_) => {
                tracing::info!("✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                tracing::error!("❌ 模型连接失败: {}", e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ReasoningService for LLMClient {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ModelReply, ReasoningError> {
        let model_name = self.model_name(request.tier);
        tracing::debug!(model = model_name, turns = request.conversation.len(), "🤖 调用模型");
        self.client
            .completion_model(model_name)
            .complete(request, &self.config)
            .await
    }
}
