//! 诊断流水线的有限状态机：Insights → Research → Planning

use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{FailureKind, PipelineFailure, StageError};
use crate::generator::artifact_log::StageArtifact;
use crate::generator::context::PipelineContext;
use crate::generator::stage_agent::StageAgent;
use crate::generator::stages::types::StageName;
use crate::generator::stages::{InsightsAgent, PlanningAgent, ResearchAgent};
use crate::generator::workflow::{TimingReport, TimingScope};
use crate::types::KpiTarget;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Init,
    Running(StageName),
    Completed,
    Failed(PipelineFailure),
}

/// 单次运行的状态，由编排器独占
#[derive(Debug)]
pub struct PipelineState {
    kpi: KpiTarget,
    /// 插入顺序即执行顺序
    artifacts: Vec<StageArtifact>,
    timing: TimingScope,
    status: PipelineStatus,
}

impl PipelineState {
    pub fn new(kpi: KpiTarget) -> Self {
        Self {
            kpi,
            artifacts: Vec::new(),
            timing: TimingScope::new(),
            status: PipelineStatus::Init,
        }
    }

    pub fn kpi(&self) -> &KpiTarget {
        &self.kpi
    }

    pub fn artifacts(&self) -> &[StageArtifact] {
        &self.artifacts
    }

    pub fn artifact(&self, stage: StageName) -> Option<&StageArtifact> {
        self.artifacts.iter().find(|a| a.stage() == stage)
    }

    pub fn timing(&self) -> &TimingScope {
        &self.timing
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    fn fail(&mut self, stage: StageName, error: &StageError) {
        self.timing.end_phase(stage);
        self.timing.finish();
        let failure = PipelineFailure::new(stage, error);
        tracing::error!(stage = %stage, kind = ?failure.kind, "❌ 阶段 {} 执行失败: {}", stage, failure.reason);
        self.status = PipelineStatus::Failed(failure);
    }

    fn complete(&mut self) {
        self.timing.finish();
        self.status = PipelineStatus::Completed;
    }

    /// 终止状态下的最终输出；失败时不包含任何阶段产物
    pub fn output(&self) -> Option<PipelineOutput> {
        let timing = self.timing.report();
        match &self.status {
            PipelineStatus::Completed => {
                let payload = |stage| self.artifact(stage).map(|a| a.payload().clone());
                Some(PipelineOutput::Completed(CompletedReport {
                    insights: payload(StageName::Insights)?,
                    research: payload(StageName::Research)?,
                    strategy_plan: payload(StageName::Planning)?,
                    timing,
                }))
            }
            PipelineStatus::Failed(failure) => Some(PipelineOutput::Failed(FailedReport {
                status: "failed",
                failed_stage: failure.stage,
                error_kind: failure.kind,
                reason: failure.reason.clone(),
                timing,
            })),
            PipelineStatus::Init | PipelineStatus::Running(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletedReport {
    pub insights: Value,
    pub research: Value,
    pub strategy_plan: Value,
    pub timing: TimingReport,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedReport {
    pub status: &'static str,
    pub failed_stage: StageName,
    pub error_kind: FailureKind,
    pub reason: String,
    pub timing: TimingReport,
}

/// 流水线的最终JSON文档
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PipelineOutput {
    Completed(CompletedReport),
    Failed(FailedReport),
}

impl PipelineOutput {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutput::Completed(_))
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 多阶段诊断编排器
#[derive(Default)]
pub struct Orchestrator;

impl Orchestrator {
    /// 依次执行三个阶段，任一阶段失败即停止
    pub async fn run(&self, context: &PipelineContext) -> PipelineState {
        let mut state = PipelineState::new(context.kpi.clone());
        let deadline = context
            .config
            .pipeline
            .deadline_seconds
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        tracing::info!(kpi = %context.kpi.metric, "🚀 开始执行KPI诊断流程...");

        if let Err((stage, error)) = self.run_stages(context, &mut state, deadline).await {
            state.fail(stage, &error);
            return state;
        }

        state.complete();
        tracing::info!("✓ KPI诊断流程执行完毕");
        state
    }

    async fn run_stages(
        &self,
        context: &PipelineContext,
        state: &mut PipelineState,
        deadline: Option<Instant>,
    ) -> Result<(), (StageName, StageError)> {
        self.execute_stage(&InsightsAgent, context, state, deadline)
            .await?;
        self.execute_stage(&ResearchAgent, context, state, deadline)
            .await?;
        self.execute_stage(&PlanningAgent, context, state, deadline)
            .await
    }

    /// 执行单个阶段
    async fn execute_stage<T: StageAgent>(
        &self,
        agent: &T,
        context: &PipelineContext,
        state: &mut PipelineState,
        deadline: Option<Instant>,
    ) -> Result<(), (StageName, StageError)> {
        let stage = agent.stage();
        state.status = PipelineStatus::Running(stage);
        state.timing.start_phase(stage);

        for required in agent.required_artifacts() {
            if state.artifact(required).is_none() {
                return Err((stage, StageError::MissingDependency(required)));
            }
        }

        let deadline_exceeded = || {
            StageError::DeadlineExceeded(format!(
                "pipeline deadline of {}s exceeded",
                context.config.pipeline.deadline_seconds.unwrap_or_default()
            ))
        };

        let result = {
            let execution = agent.execute(context, &state.artifacts);
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        Err(deadline_exceeded())
                    } else {
                        tokio::time::timeout(remaining, execution)
                            .await
                            .unwrap_or_else(|_| Err(deadline_exceeded()))
                    }
                }
                None => execution.await,
            }
        };
        let artifact = result.map_err(|e| (stage, e))?;

        if let Err(e) = context.record_artifact(artifact.clone()).await {
            tracing::warn!("⚠️ {}", e);
        }
        state.artifacts.push(artifact);

        if let Some(duration) = state.timing.end_phase(stage) {
            tracing::info!(stage = %stage, "✓ {} 阶段完成，耗时 {:.2}秒", stage, duration.as_secs_f64());
        }
        Ok(())
    }
}
