//! 数据访问层 - 对分析仓库的固定只读查询目录

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::{DataAccessError, ReasoningError};
use crate::llm::client::types::{ConversationTurn, ModelReply, ModelTier, ReasoningRequest};
use crate::llm::client::{ReasoningService, respond_with_retry};
use crate::types::WarehouseLocation;
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

pub mod bigquery;
pub mod fixture;
pub mod metrics;
pub mod queries;
pub mod sql_guard;

pub use bigquery::BigQueryWarehouse;
pub use fixture::{FixtureWarehouse, PerformanceRecord};
pub use metrics::{MetricTotals, safe_divide};

/// 查询结果中的一行，列名到值
pub type Row = serde_json::Map<String, Value>;

/// 所有固定查询共享的可选过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

impl QueryFilters {
    /// 检查日期区间是否合法
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(format!(
                    "start_date {} is after end_date {}",
                    start, end
                ));
            }
        }
        if matches!(&self.campaign_id, Some(id) if id.trim().is_empty()) {
            return Err("campaign_id must not be empty".to_string());
        }
        Ok(())
    }

    /// 判断一条记录是否落在过滤范围内
    pub fn matches(&self, date: NaiveDate, campaign_id: &str) -> bool {
        self.start_date.is_none_or(|start| date >= start)
            && self.end_date.is_none_or(|end| date <= end)
            && self
                .campaign_id
                .as_deref()
                .is_none_or(|id| id == campaign_id)
    }
}

/// 命名查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    pub name: String,
    /// BigQuery 参数类型，如 STRING、DATE
    pub kind: &'static str,
    pub value: String,
}

impl QueryParameter {
    pub fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "STRING",
            value: value.to_string(),
        }
    }

    pub fn date(name: &str, value: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            kind: "DATE",
            value: value.format("%Y-%m-%d").to_string(),
        }
    }
}

/// 查询形态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    CurrentMetrics,
    SegmentBreakdown {
        dimension: String,
        limit: Option<usize>,
    },
    TimeSeries,
    /// 自然语言生成并通过只读校验的SQL
    RawSql,
}

/// 发往仓库的完整查询
#[derive(Debug, Clone)]
pub struct WarehouseQuery {
    pub shape: QueryShape,
    pub location: WarehouseLocation,
    pub filters: QueryFilters,
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

/// 分析仓库后端
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// 执行一次查询，不做重试
    async fn execute(&self, query: &WarehouseQuery) -> Result<Vec<Row>, DataAccessError>;
}

/// 自然语言查询的结果，保留生成的SQL以便审计
#[derive(Debug, Clone, Serialize)]
pub struct NaturalLanguageResult {
    pub sql: String,
    pub rows: Vec<Row>,
}

/// 数据访问层：唯一产生原始数值事实的组件
#[derive(Clone)]
pub struct DataAccessLayer {
    warehouse: Arc<dyn Warehouse>,
    policy: RetryPolicy,
    segment_dimensions: Vec<String>,
    max_rows: usize,
    sql_generator: Option<(Arc<dyn ReasoningService>, RetryPolicy)>,
}

impl DataAccessLayer {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: &WarehouseConfig) -> Self {
        Self {
            warehouse,
            policy: RetryPolicy::new(
                config.retry_attempts,
                config.retry_delay_ms,
                config.timeout_seconds,
            ),
            segment_dimensions: config.segment_dimensions.clone(),
            max_rows: config.max_rows,
            sql_generator: None,
        }
    }

    /// 按配置创建仓库后端
    pub fn from_config(config: &WarehouseConfig) -> anyhow::Result<Self> {
        let warehouse: Arc<dyn Warehouse> = match config.backend {
            WarehouseBackend::BigQuery => Arc::new(BigQueryWarehouse::new(config)?),
            WarehouseBackend::Fixture => {
                let path = config.fixture_path.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("warehouse.fixture_path is required for the fixture backend")
                })?;
                Arc::new(FixtureWarehouse::from_file(path)?)
            }
        };
        Ok(Self::new(warehouse, config))
    }

    /// 启用自然语言查询，SQL由推理服务生成
    pub fn with_sql_generator(
        mut self,
        reasoner: Arc<dyn ReasoningService>,
        policy: RetryPolicy,
    ) -> Self {
        self.sql_generator = Some((reasoner, policy));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn segment_dimensions(&self) -> &[String] {
        &self.segment_dimensions
    }

    pub fn supports_natural_language(&self) -> bool {
        self.sql_generator.is_some()
    }

    /// 当前汇总指标
    pub async fn current_metrics(
        &self,
        location: &WarehouseLocation,
        filters: &QueryFilters,
    ) -> Result<Vec<Row>, DataAccessError> {
        self.run(queries::current_metrics(location, filters)).await
    }

    /// 按维度拆解，默认 campaign_id
    pub async fn segment_breakdown(
        &self,
        location: &WarehouseLocation,
        dimension: Option<&str>,
        limit: Option<usize>,
        filters: &QueryFilters,
    ) -> Result<Vec<Row>, DataAccessError> {
        let dimension = dimension.unwrap_or("campaign_id");
        if !self.segment_dimensions.iter().any(|d| d == dimension) {
            return Err(DataAccessError::Rejected(format!(
                "dimension '{}' is not one of: {}",
                dimension,
                self.segment_dimensions.join(", ")
            )));
        }
        let limit = limit.map(|l| l.min(self.max_rows));
        self.run(queries::segment_breakdown(location, dimension, limit, filters))
            .await
    }

    /// 按日期的时间序列
    pub async fn time_series(
        &self,
        location: &WarehouseLocation,
        filters: &QueryFilters,
    ) -> Result<Vec<Row>, DataAccessError> {
        self.run(queries::time_series(location, filters)).await
    }

    /// 自然语言查询：生成SQL、只读校验、执行
    pub async fn natural_language_query(
        &self,
        location: &WarehouseLocation,
        description: &str,
    ) -> Result<NaturalLanguageResult, DataAccessError> {
        let (reasoner, policy) = self.sql_generator.as_ref().ok_or_else(|| {
            DataAccessError::Rejected("natural language queries are disabled".to_string())
        })?;

        let request = ReasoningRequest {
            system_prompt: nl2sql_prompt(location, &self.segment_dimensions, self.max_rows),
            conversation: vec![ConversationTurn::user(description)],
            tools: Vec::new(),
            tier: ModelTier::Efficient,
        };
        let reply = respond_with_retry(reasoner.as_ref(), &request, policy)
            .await
            .map_err(|e| match e {
                ReasoningError::Timeout(secs) => DataAccessError::Timeout(secs),
                other => DataAccessError::Unavailable(format!("sql generation failed: {}", other)),
            })?;

        let generated = match reply {
            ModelReply::Final(text) => text,
            ModelReply::ToolCalls(_) => {
                return Err(DataAccessError::Rejected(
                    "sql generator requested tools instead of returning SQL".to_string(),
                ));
            }
        };

        let sql = sql_guard::ensure_read_only(&sql_guard::strip_fences(&generated))?;
        tracing::debug!(sql = %sql, "🧮 自然语言查询已生成SQL");
        let rows = self.run(queries::raw_sql(location, sql.clone())).await?;
        Ok(NaturalLanguageResult { sql, rows })
    }

    /// 带重试地执行查询，瞬时故障按策略退避，其余错误直接返回
    async fn run(&self, query: WarehouseQuery) -> Result<Vec<Row>, DataAccessError> {
        let timeout_secs = self.policy.timeout.as_secs();
        let label = format!("仓库查询 {:?}", query.shape);
        let warehouse = &self.warehouse;
        let query = &query;

        let mut rows = retry_with_backoff(
            &label,
            &self.policy,
            DataAccessError::is_transient,
            || DataAccessError::Timeout(timeout_secs),
            move || async move { warehouse.execute(query).await },
        )
        .await
        .map_err(|exhausted| {
            if exhausted.fatal {
                exhausted.last
            } else {
                DataAccessError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    last: Box::new(exhausted.last),
                }
            }
        })?;

        rows.truncate(self.max_rows);
        Ok(rows)
    }
}

fn nl2sql_prompt(location: &WarehouseLocation, dimensions: &[String], max_rows: usize) -> String {
    format!(
        r#"You translate analytics questions into a single BigQuery Standard SQL query.

Table: {}
Columns: date (DATE), campaign_id (STRING), {} (STRING), cost (FLOAT64), conversions (FLOAT64), revenue (FLOAT64), clicks (INT64), impressions (INT64)

Rules:
- Return exactly one SELECT or WITH statement and nothing else
- Never modify data or schema
- Use SAFE_DIVIDE for every ratio
- Return at most {} rows"#,
        location.qualified_table(),
        dimensions
            .iter()
            .filter(|d| d.as_str() != "campaign_id")
            .cloned()
            .collect::<Vec<_>>()
            .join(" (STRING), "),
        max_rows
    )
}
