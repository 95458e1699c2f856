//! 追加写入的产物日志：已校验的阶段产物与原始对话轨迹

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::generator::stages::types::StageName;
use crate::llm::client::types::{ConversationTurn, ToolCallRequest, ToolCallResult, TurnContent};

/// 阶段产物，每个阶段成功时恰好生成一次，之后不可修改
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageArtifact {
    stage: StageName,
    payload: Value,
    timestamp: DateTime<Utc>,
    duration_ms: u64,
}

impl StageArtifact {
    pub fn new(stage: StageName, payload: Value, duration: Duration) -> Self {
        Self {
            stage,
            payload,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// 一次阶段调用的完整对话轨迹
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageTrace {
    pub stage: StageName,
    pub model_calls: usize,
    pub turns: Vec<ConversationTurn>,
}

impl StageTrace {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            model_calls: 0,
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// 指定工具的成功调用结果，按调用顺序
    pub fn successful_results<'a>(
        &'a self,
        tool_name: &'a str,
    ) -> impl Iterator<Item = &'a ToolCallResult> + 'a {
        self.turns.iter().filter_map(move |turn| match &turn.content {
            TurnContent::ToolResult(result) if result.success && result.tool_name == tool_name => {
                Some(result)
            }
            _ => None,
        })
    }

    /// 按调用id查找原始请求
    pub fn request_for(&self, call_id: &str) -> Option<&ToolCallRequest> {
        self.turns.iter().find_map(|turn| match &turn.content {
            TurnContent::ToolCalls(calls) => calls.iter().find(|c| c.id == call_id),
            _ => None,
        })
    }
}

/// 产物日志
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactLog {
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    artifacts: Vec<StageArtifact>,
    traces: Vec<StageTrace>,
}

impl Default for ArtifactLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactLog {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            last_updated: Utc::now(),
            artifacts: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// 追加阶段产物，同一阶段只能写入一次
    pub fn append_artifact(&mut self, artifact: StageArtifact) -> Result<()> {
        if self.artifact(artifact.stage()).is_some() {
            bail!("artifact for stage {} is already recorded", artifact.stage());
        }
        self.artifacts.push(artifact);
        self.last_updated = Utc::now();
        Ok(())
    }

    /// 追加对话轨迹，失败阶段的轨迹同样保留
    pub fn append_trace(&mut self, trace: StageTrace) -> Result<()> {
        if self.trace(trace.stage).is_some() {
            bail!("trace for stage {} is already recorded", trace.stage);
        }
        self.traces.push(trace);
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn artifact(&self, stage: StageName) -> Option<&StageArtifact> {
        self.artifacts.iter().find(|a| a.stage() == stage)
    }

    pub fn trace(&self, stage: StageName) -> Option<&StageTrace> {
        self.traces.iter().find(|t| t.stage == stage)
    }

    pub fn artifacts(&self) -> &[StageArtifact] {
        &self.artifacts
    }

    pub fn traces(&self) -> &[StageTrace] {
        &self.traces
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
