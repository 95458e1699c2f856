//! 推理服务边界上的对话类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型请求调用的工具
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 工具调用结果，失败时 `payload` 为 `{"error": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub payload: Value,
    pub elapsed_ms: u64,
}

impl ToolCallResult {
    pub fn ok(request: &ToolCallRequest, payload: Value, elapsed_ms: u64) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            success: true,
            payload,
            elapsed_ms,
        }
    }

    pub fn failed(request: &ToolCallRequest, error: impl std::fmt::Display, elapsed_ms: u64) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            success: false,
            payload: serde_json::json!({ "error": error.to_string() }),
            elapsed_ms,
        }
    }

    /// 回传给模型的文本
    pub fn content_text(&self) -> String {
        self.payload.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TurnContent {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
    ToolResult(ToolCallResult),
}

/// 一次阶段调用中的单条对话记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    fn at_now(role: Role, content: TurnContent) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::at_now(Role::System, TurnContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::at_now(Role::User, TurnContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::at_now(Role::Assistant, TurnContent::Text(text.into()))
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::at_now(Role::Assistant, TurnContent::ToolCalls(calls))
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Self::at_now(Role::Tool, TurnContent::ToolResult(result))
    }
}

/// 提供给推理服务的工具描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 模型档位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// 高能效模型
    #[default]
    Efficient,
    /// 高质量模型
    Powerful,
}

/// 一次模型调用的完整输入
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReasoningRequest {
    pub system_prompt: String,
    /// 不含系统消息的对话历史，最后一条为本轮输入
    pub conversation: Vec<ConversationTurn>,
    pub tools: Vec<ToolSpec>,
    pub tier: ModelTier,
}

/// 模型回复：要么请求工具，要么给出最终文本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ModelReply {
    ToolCalls(Vec<ToolCallRequest>),
    Final(String),
}
