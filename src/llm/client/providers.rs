//! LLM Provider支持模块

use anyhow::Result;
use rig::{
    OneOrMany,
    client::CompletionClient,
    completion::{CompletionModel, Message, ToolDefinition},
    message::{AssistantContent, ToolResultContent, UserContent},
    providers::gemini::completion::gemini_api_types::{AdditionalParameters, GenerationConfig},
};

use super::types::{
    ConversationTurn, ModelReply, ReasoningRequest, Role, ToolCallRequest, TurnContent,
};
use crate::config::{LLMConfig, LLMProvider};
use crate::error::ReasoningError;

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    Moonshot(rig::providers::moonshot::Client),
    DeepSeek(rig::providers::deepseek::Client),
    Mistral(rig::providers::mistral::Client),
    OpenRouter(rig::providers::openrouter::Client),
    Anthropic(rig::providers::anthropic::Client),
    Gemini(rig::providers::gemini::Client),
    Ollama(rig::providers::ollama::Client),
}

impl ProviderClient {
    /// 根据配置创建相应的provider客户端
    pub fn new(config: &LLMConfig) -> Result<Self> {
        match config.provider {
            LLMProvider::OpenAI => {
                let client = rig::providers::openai::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::OpenAI(client))
            }
            LLMProvider::Moonshot => {
                let client = rig::providers::moonshot::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::Moonshot(client))
            }
            LLMProvider::DeepSeek => {
                let client = rig::providers::deepseek::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::DeepSeek(client))
            }
            LLMProvider::Mistral => {
                let client = rig::providers::mistral::Client::builder(&config.api_key).build();
                Ok(ProviderClient::Mistral(client))
            }
            LLMProvider::OpenRouter => {
                let client = rig::providers::openrouter::Client::builder(&config.api_key).build();
                Ok(ProviderClient::OpenRouter(client))
            }
            LLMProvider::Anthropic => {
                let client =
                    rig::providers::anthropic::ClientBuilder::new(&config.api_key).build()?;
                Ok(ProviderClient::Anthropic(client))
            }
            LLMProvider::Gemini => {
                let client = rig::providers::gemini::Client::builder(&config.api_key).build()?;
                Ok(ProviderClient::Gemini(client))
            }
            LLMProvider::Ollama => {
                let client = rig::providers::ollama::Client::builder().build();
                Ok(ProviderClient::Ollama(client))
            }
        }
    }

    /// 按模型名创建补全模型
    pub fn completion_model(&self, model: &str) -> ProviderModel {
        match self {
            ProviderClient::OpenAI(client) => {
                ProviderModel::OpenAI(client.completion_model(model).completions_api())
            }
            ProviderClient::Moonshot(client) => ProviderModel::Moonshot(client.completion_model(model)),
            ProviderClient::DeepSeek(client) => ProviderModel::DeepSeek(client.completion_model(model)),
            ProviderClient::Mistral(client) => ProviderModel::Mistral(client.completion_model(model)),
            ProviderClient::OpenRouter(client) => {
                ProviderModel::OpenRouter(client.completion_model(model))
            }
            ProviderClient::Anthropic(client) => {
                ProviderModel::Anthropic(client.completion_model(model))
            }
            ProviderClient::Gemini(client) => ProviderModel::Gemini(client.completion_model(model)),
            ProviderClient::Ollama(client) => ProviderModel::Ollama(client.completion_model(model)),
        }
    }
}

/// 统一的补全模型枚举
pub enum ProviderModel {
    OpenAI(rig::providers::openai::CompletionModel),
    Mistral(rig::providers::mistral::CompletionModel),
    OpenRouter(rig::providers::openrouter::CompletionModel),
    Anthropic(rig::providers::anthropic::completion::CompletionModel),
    Gemini(rig::providers::gemini::completion::CompletionModel),
    Moonshot(rig::providers::moonshot::CompletionModel),
    DeepSeek(rig::providers::deepseek::CompletionModel),
    Ollama(rig::providers::ollama::CompletionModel<reqwest::Client>),
}

impl ProviderModel {
    /// 发送一次补全请求
    pub async fn complete(
        &self,
        request: &ReasoningRequest,
        config: &LLMConfig,
    ) -> Result<ModelReply, ReasoningError> {
        match self {
            ProviderModel::OpenAI(model) => complete_with(model, request, config, None).await,
            ProviderModel::Moonshot(model) => complete_with(model, request, config, None).await,
            ProviderModel::DeepSeek(model) => complete_with(model, request, config, None).await,
            ProviderModel::Mistral(model) => complete_with(model, request, config, None).await,
            ProviderModel::OpenRouter(model) => complete_with(model, request, config, None).await,
            ProviderModel::Anthropic(model) => complete_with(model, request, config, None).await,
            ProviderModel::Gemini(model) => {
                let params = AdditionalParameters::default().with_config(GenerationConfig::default());
                let params = serde_json::to_value(params)
                    .map_err(|e| ReasoningError::InvalidRequest(e.to_string()))?;
                complete_with(model, request, config, Some(params)).await
            }
            ProviderModel::Ollama(model) => complete_with(model, request, config, None).await,
        }
    }
}

async fn complete_with<M: CompletionModel>(
    model: &M,
    request: &ReasoningRequest,
    config: &LLMConfig,
    additional_params: Option<serde_json::Value>,
) -> Result<ModelReply, ReasoningError> {
    let mut messages = to_rig_messages(&request.conversation);
    let prompt = messages.pop().ok_or_else(|| {
        ReasoningError::InvalidRequest("conversation has no message to send".to_string())
    })?;

    let tools: Vec<ToolDefinition> = request
        .tools
        .iter()
        .map(|spec| ToolDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.clone(),
        })
        .collect();

    let mut builder = model
        .completion_request(prompt)
        .preamble(request.system_prompt.clone())
        .messages(messages)
        .tools(tools)
        .temperature(config.temperature)
        .max_tokens(config.max_tokens.into());
    if let Some(params) = additional_params {
        builder = builder.additional_params(params);
    }

    let response = model
        .completion(builder.build())
        .await
        .map_err(|e| ReasoningError::Provider(e.to_string()))?;

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for content in response.choice.iter() {
        match content {
            AssistantContent::Text(text) => texts.push(text.text.clone()),
            AssistantContent::ToolCall(call) => tool_calls.push(ToolCallRequest::new(
                call.id.clone(),
                call.function.name.clone(),
                call.function.arguments.clone(),
            )),
            _ => {}
        }
    }

    if !tool_calls.is_empty() {
        Ok(ModelReply::ToolCalls(tool_calls))
    } else if !texts.is_empty() {
        Ok(ModelReply::Final(texts.join("\n")))
    } else {
        Err(ReasoningError::Provider(
            "model returned neither text nor tool calls".to_string(),
        ))
    }
}

/// 对话记录转换为rig消息，系统消息通过preamble传递
fn to_rig_messages(conversation: &[ConversationTurn]) -> Vec<Message> {
    let mut out = Vec::new();
    for turn in conversation {
        match (&turn.role, &turn.content) {
            (Role::System, _) => {}
            (Role::Assistant, TurnContent::Text(text)) => out.push(Message::assistant(text.clone())),
            (_, TurnContent::Text(text)) => out.push(Message::user(text.clone())),
            (_, TurnContent::ToolCalls(calls)) => {
                // 同一轮的多个工具调用放在同一条assistant消息里
                if let Ok(content) = OneOrMany::many(calls.iter().map(|call| {
                    AssistantContent::tool_call(&call.id, &call.name, call.arguments.clone())
                })) {
                    out.push(Message::Assistant { id: None, content });
                }
            }
            (_, TurnContent::ToolResult(result)) => out.push(Message::User {
                content: OneOrMany::one(UserContent::tool_result(
                    &result.call_id,
                    OneOrMany::one(ToolResultContent::text(result.content_text())),
                )),
            }),
        }
    }
    out
}
