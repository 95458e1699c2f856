use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 需要诊断的KPI目标，整条流水线的不可变输入
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct KpiTarget {
    /// 指标名称，如 ROAS、CPA、Conversion Rate
    pub metric: String,
    pub current_value: f64,
    pub target_value: f64,
    /// 目标时间窗口，如 "Q3"、"next 30 days"
    pub timeframe: String,
    /// 指标单位，ROAS 通常为 "x"
    #[serde(default)]
    pub unit: String,
    /// 用户的原始目标描述（自然语言，可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl KpiTarget {
    pub fn new(
        metric: impl Into<String>,
        current_value: f64,
        target_value: f64,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            current_value,
            target_value,
            timeframe: timeframe.into(),
            unit: String::new(),
            goal: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// 目标差距：正数表示尚未达成
    pub fn gap(&self) -> f64 {
        self.target_value - self.current_value
    }

    pub fn is_met(&self) -> bool {
        self.gap() <= 0.0
    }
}

/// 仓库中记录源的坐标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarehouseLocation {
    pub project_id: String,
    pub dataset_id: String,
    pub table: String,
}

impl WarehouseLocation {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table: table.into(),
        }
    }

    /// 完整限定表名，形如 `project.dataset.table`
    pub fn qualified_table(&self) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset_id, self.table)
    }
}

impl Default for WarehouseLocation {
    fn default() -> Self {
        Self::new("your-gcp-project-id", "google_ads_data", "ads_performance")
    }
}

impl std::fmt::Display for WarehouseLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table)
    }
}
