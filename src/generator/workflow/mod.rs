use crate::config::Config;
use crate::generator::context::PipelineContext;
use crate::generator::orchestrator::{Orchestrator, PipelineOutput};
use crate::generator::stages::types::StageName;
use crate::llm::client::LLMClient;
use crate::warehouse::DataAccessLayer;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 单个阶段的起止时间
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// 最终报告中的耗时记录
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimingReport {
    pub insights_ms: Option<u64>,
    pub research_ms: Option<u64>,
    pub planning_ms: Option<u64>,
    pub total_ms: u64,
}

/// 时间跟踪作用域
#[derive(Debug, Clone)]
pub struct TimingScope {
    start_time: Instant,
    phase_start_times: BTreeMap<StageName, Instant>,
    stages: BTreeMap<StageName, StageTiming>,
    total: Option<Duration>,
}

impl Default for TimingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingScope {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            phase_start_times: BTreeMap::new(),
            stages: BTreeMap::new(),
            total: None,
        }
    }

    /// 开始一个阶段的计时
    pub fn start_phase(&mut self, stage: StageName) {
        self.phase_start_times.insert(stage, Instant::now());
        self.stages.insert(
            stage,
            StageTiming {
                started_at: Utc::now(),
                finished_at: None,
                duration_ms: None,
            },
        );
    }

    /// 结束一个阶段的计时
    pub fn end_phase(&mut self, stage: StageName) -> Option<Duration> {
        let duration = self.phase_start_times.remove(&stage)?.elapsed();
        if let Some(timing) = self.stages.get_mut(&stage) {
            timing.finished_at = Some(Utc::now());
            timing.duration_ms = Some(duration.as_millis() as u64);
        }
        Some(duration)
    }

    /// 流水线结束时冻结总耗时
    pub fn finish(&mut self) {
        if self.total.is_none() {
            self.total = Some(self.start_time.elapsed());
        }
    }

    /// 获取总执行时间，未结束时为当前已用时间
    pub fn get_total_duration(&self) -> Duration {
        self.total.unwrap_or_else(|| self.start_time.elapsed())
    }

    pub fn stage(&self, stage: StageName) -> Option<&StageTiming> {
        self.stages.get(&stage)
    }

    pub fn stage_ms(&self, stage: StageName) -> Option<u64> {
        self.stages.get(&stage).and_then(|t| t.duration_ms)
    }

    pub fn report(&self) -> TimingReport {
        TimingReport {
            insights_ms: self.stage_ms(StageName::Insights),
            research_ms: self.stage_ms(StageName::Research),
            planning_ms: self.stage_ms(StageName::Planning),
            total_ms: self.get_total_duration().as_millis() as u64,
        }
    }

    /// 获取格式化的执行时间报告
    pub fn generate_timing_report(&self) -> String {
        let mut report = format!(
            "总执行时间: {:.2}秒\n",
            self.get_total_duration().as_secs_f64()
        );

        if !self.stages.is_empty() {
            report.push_str("\n各阶段执行时间:\n");
            for (stage, timing) in &self.stages {
                match timing.duration_ms {
                    Some(ms) => report.push_str(&format!("- {}: {:.3}秒\n", stage, ms as f64 / 1000.0)),
                    None => report.push_str(&format!("- {}: 未完成\n", stage)),
                }
            }
        }

        report
    }
}

/// 在已构建的上下文上运行一次诊断流水线，并按配置保存报告
pub async fn run_pipeline(context: &PipelineContext) -> Result<PipelineOutput> {
    let state = Orchestrator.run(context).await;
    tracing::info!("⏱️ {}", state.timing().generate_timing_report());

    let output = state
        .output()
        .ok_or_else(|| anyhow!("pipeline stopped before reaching a terminal state"))?;
    crate::generator::outlet::save(context, &output).await?;
    Ok(output)
}

/// 启动KPI诊断工作流
pub async fn launch(config: &Config) -> Result<PipelineOutput> {
    let kpi = config.kpi.clone().ok_or_else(|| {
        anyhow!("no KPI target given, pass --metric/--current/--target or --kpi-file")
    })?;

    let llm_client = LLMClient::new(config.llm.clone())?;
    // 启动时检查模型连接
    llm_client.check_connection().await?;

    let dal = DataAccessLayer::from_config(&config.warehouse)?;
    let context = PipelineContext::new(config.clone(), kpi, Arc::new(llm_client), dal);

    run_pipeline(&context).await
}
