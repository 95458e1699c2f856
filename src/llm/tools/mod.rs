//! 工具注册表 - 把具名工具绑定到处理函数，并校验参数

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{DataAccessError, RegistryError, ToolError, ToolResolutionError};
use crate::llm::client::types::{ToolCallRequest, ToolCallResult, ToolSpec};

pub mod schema;
pub mod warehouse_tools;

/// 工具处理函数
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// 工具描述，注册后不可变
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema object
    pub parameters: Value,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 单个阶段可见的工具集合，按注册顺序保存
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具，同名工具已存在时失败
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.contains(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// 提供给推理服务的工具描述
    pub fn definitions(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDescriptor::spec).collect()
    }

    /// 校验并执行一次工具调用
    ///
    /// 未知工具和参数不匹配作为失败结果返回给模型；
    /// 只有数据访问失败以 `Err` 返回，由调用方升级为阶段失败。
    pub async fn resolve(
        &self,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResult, DataAccessError> {
        let started = Instant::now();
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let Some(tool) = self.get(&request.name) else {
            let error = ToolResolutionError::UnknownTool {
                name: request.name.clone(),
                available: self.names().join(", "),
            };
            tracing::warn!(tool = %request.name, "⚠️ 模型请求了未知工具");
            return Ok(ToolCallResult::failed(request, error, elapsed(started)));
        };

        if let Err(error) = schema::validate_arguments(&tool.name, &tool.parameters, &request.arguments) {
            tracing::warn!(tool = %tool.name, "⚠️ 工具参数校验失败: {}", error);
            return Ok(ToolCallResult::failed(request, error, elapsed(started)));
        }

        match tool.handler.call(request.arguments.clone()).await {
            Ok(payload) => {
                let elapsed_ms = elapsed(started);
                tracing::debug!(tool = %tool.name, elapsed_ms, "🔧 工具调用完成");
                Ok(ToolCallResult::ok(request, payload, elapsed_ms))
            }
            Err(ToolError::Resolution(error)) => {
                tracing::warn!(tool = %tool.name, "⚠️ 工具参数无法解析: {}", error);
                Ok(ToolCallResult::failed(request, error, elapsed(started)))
            }
            Err(ToolError::DataAccess(error)) => {
                tracing::error!(tool = %tool.name, "❌ 工具数据访问失败: {}", error);
                Err(error)
            }
        }
    }

    /// 并发执行同一轮的多个工具调用，结果保持请求顺序
    pub async fn resolve_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<Result<ToolCallResult, DataAccessError>> {
        futures::future::join_all(requests.iter().map(|request| self.resolve(request))).await
    }
}

#[cfg(test)]
mod tests;
