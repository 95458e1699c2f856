//! 引擎错误分类

use serde::Serialize;
use thiserror::Error;

use crate::generator::stages::types::StageName;

/// 数据访问层错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DataAccessError {
    /// 仓库不可达（网络错误、5xx、限流），可重试
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),

    /// 单次查询超时，可重试
    #[error("warehouse query timed out after {0}s")]
    Timeout(u64),

    /// 查询被拒绝（非只读、语法错误、非法标识符），不重试
    #[error("query rejected: {0}")]
    Rejected(String),

    /// 返回结果无法解析
    #[error("failed to decode warehouse response: {0}")]
    Decode(String),

    /// 重试次数耗尽
    #[error("warehouse still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<DataAccessError> },
}

impl DataAccessError {
    /// 是否属于瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataAccessError::Unavailable(_) | DataAccessError::Timeout(_)
        )
    }
}

/// 推理服务调用错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReasoningError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),

    /// 服务端或网络错误，可重试
    #[error("model provider error: {0}")]
    Provider(String),

    /// 请求本身无法被服务接受，重试无意义
    #[error("invalid model request: {0}")]
    InvalidRequest(String),
}

impl ReasoningError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReasoningError::InvalidRequest(_))
    }
}

/// 工具解析错误，会作为失败的工具结果反馈给模型
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolResolutionError {
    #[error("unknown tool '{name}', available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// 工具处理函数的失败
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// 参数问题，反馈给模型修正
    #[error(transparent)]
    Resolution(#[from] ToolResolutionError),

    /// 数据访问失败，升级为阶段失败
    #[error(transparent)]
    DataAccess(#[from] DataAccessError),
}

/// 工具注册错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("tool '{0}' is not available to this stage")]
    UnavailableTool(String),
}

/// 阶段执行失败
#[derive(Debug, Error)]
pub enum StageError {
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("non-termination: no final answer after {max_turns} turns")]
    NonTermination { max_turns: usize },

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("data access failed: {0}")]
    DataAccess(#[from] DataAccessError),

    #[error("reasoning service failed: {0}")]
    Model(String),

    #[error("missing required artifact from stage {0}")]
    MissingDependency(StageName),

    #[error("tool registry misconfigured: {0}")]
    Registry(#[from] RegistryError),
}

/// 失败分类，用于错误报告
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SchemaViolation,
    NonTermination,
    DeadlineExceeded,
    DataAccess,
    Model,
    MissingDependency,
    Configuration,
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::SchemaViolation(_) => FailureKind::SchemaViolation,
            StageError::NonTermination { .. } => FailureKind::NonTermination,
            StageError::DeadlineExceeded(_) => FailureKind::DeadlineExceeded,
            StageError::DataAccess(_) => FailureKind::DataAccess,
            StageError::Model(_) => FailureKind::Model,
            StageError::MissingDependency(_) => FailureKind::MissingDependency,
            StageError::Registry(_) => FailureKind::Configuration,
        }
    }
}

/// 流水线的终止失败记录
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[error("stage {stage} failed: {reason}")]
pub struct PipelineFailure {
    pub stage: StageName,
    pub kind: FailureKind,
    pub reason: String,
}

impl PipelineFailure {
    pub fn new(stage: StageName, error: &StageError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}
