use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::generator::artifact_log::{ArtifactLog, StageArtifact, StageTrace};
use crate::llm::client::ReasoningService;
use crate::types::{KpiTarget, WarehouseLocation};
use crate::utils::retry::RetryPolicy;
use crate::warehouse::DataAccessLayer;

/// 单次流水线运行的上下文，运行结束即释放
#[derive(Clone)]
pub struct PipelineContext {
    /// 配置
    pub config: Config,
    /// 待诊断的KPI，整个运行期间不变
    pub kpi: KpiTarget,
    /// 记录源坐标
    pub location: WarehouseLocation,
    /// 推理服务
    pub reasoner: Arc<dyn ReasoningService>,
    /// 模型调用的超时与重试策略
    pub model_policy: RetryPolicy,
    /// 数据访问层
    pub dal: Arc<DataAccessLayer>,
    /// 产物日志
    pub artifact_log: Arc<RwLock<ArtifactLog>>,
}

impl PipelineContext {
    pub fn new(
        config: Config,
        kpi: KpiTarget,
        reasoner: Arc<dyn ReasoningService>,
        dal: DataAccessLayer,
    ) -> Self {
        let model_policy = RetryPolicy::new(
            config.llm.retry_attempts,
            config.llm.retry_delay_ms,
            config.llm.timeout_seconds,
        );
        let dal = if config.warehouse.enable_nl2sql && !dal.supports_natural_language() {
            dal.with_sql_generator(reasoner.clone(), model_policy.clone())
        } else {
            dal
        };

        Self {
            location: config.warehouse.location.clone(),
            kpi,
            reasoner,
            model_policy,
            dal: Arc::new(dal),
            artifact_log: Arc::new(RwLock::new(ArtifactLog::new())),
            config,
        }
    }

    /// 写入阶段产物
    pub async fn record_artifact(&self, artifact: StageArtifact) -> Result<()> {
        let mut log = self.artifact_log.write().await;
        log.append_artifact(artifact)
    }

    /// 写入阶段对话轨迹
    pub async fn record_trace(&self, trace: StageTrace) {
        let mut log = self.artifact_log.write().await;
        if let Err(e) = log.append_trace(trace) {
            tracing::warn!("⚠️ {}", e);
        }
    }

    /// 产物日志快照
    pub async fn artifact_log_snapshot(&self) -> ArtifactLog {
        self.artifact_log.read().await.clone()
    }
}
