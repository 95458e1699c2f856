use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Display;

use crate::types::KpiTarget;
use crate::warehouse::safe_divide;

/// 流水线阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Insights,
    Research,
    Planning,
}

impl StageName {
    /// 固定执行顺序
    pub const ALL: [StageName; 3] = [StageName::Insights, StageName::Research, StageName::Planning];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Insights => "insights",
            StageName::Research => "research",
            StageName::Planning => "planning",
        }
    }
}

impl Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 阶段输出：结构由schema约束，语义由 `validate` 约束
pub trait StageOutput: JsonSchema + DeserializeOwned + Serialize + Send + Sync + 'static {
    /// 反序列化之后的语义检查
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// 当前表现快照，数值以仓库查询结果为准
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CurrentState {
    /// KPI名称
    #[serde(default)]
    pub metric: String,
    /// KPI当前值
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub conversions: Option<f64>,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub roas: Option<f64>,
    #[serde(default)]
    pub cpa: Option<f64>,
    /// 一句话描述当前表现
    pub summary: String,
}

/// 目标差距，数值总是由KPI目标重新计算
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GapAnalysis {
    #[serde(default)]
    pub current_value: f64,
    #[serde(default)]
    pub target_value: f64,
    /// target - current，正数表示尚未达成
    #[serde(default)]
    pub gap: f64,
    /// gap / |current|，当前值为0时为空
    #[serde(default)]
    pub gap_percent: Option<f64>,
    #[serde(default)]
    pub target_met: bool,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timeframe: String,
    /// 造成差距的主要因素
    #[serde(default)]
    pub top_drivers: Vec<String>,
}

impl GapAnalysis {
    /// 按KPI目标重新计算差距，保留模型给出的主要因素
    pub fn derive(kpi: &KpiTarget, top_drivers: Vec<String>) -> Self {
        let gap = kpi.gap();
        Self {
            current_value: kpi.current_value,
            target_value: kpi.target_value,
            gap,
            gap_percent: safe_divide(gap, kpi.current_value.abs()),
            target_met: kpi.is_met(),
            unit: kpi.unit.clone(),
            timeframe: kpi.timeframe.clone(),
            top_drivers,
        }
    }
}

/// 表现不佳的分组
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SegmentFinding {
    /// 维度，如 campaign_id、device、region
    pub dimension: String,
    pub segment: String,
    /// 偏离程度的描述，如 "ROAS 1.5 vs account 2.1"
    pub deviation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct InsightsReport {
    pub current_state: CurrentState,
    #[serde(default)]
    pub gap_analysis: GapAnalysis,
    pub key_insights: Vec<String>,
    pub risk_areas: Vec<String>,
    pub opportunities: Vec<String>,
    /// 拖累整体表现最严重的分组（最多3个）
    #[serde(default)]
    pub underperforming_segments: Vec<SegmentFinding>,
    /// 交给Research阶段验证的初步假设
    #[serde(default)]
    pub hypotheses: Vec<String>,
}

impl StageOutput for InsightsReport {
    fn validate(&self) -> Result<(), String> {
        if self.current_state.summary.trim().is_empty() {
            return Err("current_state.summary must not be empty".to_string());
        }
        if self.key_insights.iter().all(|i| i.trim().is_empty()) {
            return Err("key_insights must contain at least one insight".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Trend {
    pub description: String,
    /// 支撑数据（查询结果摘录）
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EfficiencyGap {
    pub segment: String,
    pub issue: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Confirmed,
    Rejected,
    #[default]
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Hypothesis {
    pub statement: String,
    #[serde(default)]
    pub status: HypothesisStatus,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResearchReport {
    pub trends: Vec<Trend>,
    pub efficiency_gaps: Vec<EfficiencyGap>,
    pub optimization_opportunities: Vec<String>,
    pub hypotheses: Vec<Hypothesis>,
    /// 确认的主要成因
    #[serde(default)]
    pub root_cause: String,
    /// 面向策略规划的技术发现摘要
    #[serde(default)]
    pub actionable_summary: String,
}

impl StageOutput for ResearchReport {}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    /// 由所在的档位决定
    #[serde(default)]
    pub effort_level: EffortLevel,
    pub expected_impact: String,
    #[serde(default)]
    pub implementation_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StrategyPlan {
    /// 低投入、立即见效
    pub quick_wins: Vec<Recommendation>,
    /// 中等投入、显著影响
    pub medium_effort: Vec<Recommendation>,
    /// 高投入、结构性改变
    pub high_effort: Vec<Recommendation>,
    pub metrics_to_track: Vec<String>,
    pub timeline: String,
    pub executive_summary: String,
}

impl StrategyPlan {
    pub fn recommendation_count(&self) -> usize {
        self.quick_wins.len() + self.medium_effort.len() + self.high_effort.len()
    }

    /// 按所在档位写入投入等级
    pub fn stamp_effort_levels(&mut self) {
        let tiers = [
            (&mut self.quick_wins, EffortLevel::Low),
            (&mut self.medium_effort, EffortLevel::Medium),
            (&mut self.high_effort, EffortLevel::High),
        ];
        for (recommendations, level) in tiers {
            for recommendation in recommendations.iter_mut() {
                recommendation.effort_level = level;
            }
        }
    }
}

impl StageOutput for StrategyPlan {
    fn validate(&self) -> Result<(), String> {
        if self.executive_summary.trim().is_empty() {
            return Err("executive_summary must not be empty".to_string());
        }
        if self.timeline.trim().is_empty() {
            return Err("timeline must not be empty".to_string());
        }
        if self.recommendation_count() == 0 {
            return Err("at least one recommendation is required across quick_wins, medium_effort and high_effort".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insights(value: serde_json::Value) -> Result<InsightsReport, String> {
        let report: InsightsReport = serde_json::from_value(value).map_err(|e| e.to_string())?;
        report.validate()?;
        Ok(report)
    }

    #[test]
    fn test_gap_analysis_for_met_target() {
        let on_target = GapAnalysis::derive(&KpiTarget::new("ROAS", 4.0, 4.0, "Q3"), vec![]);
        assert_eq!(on_target.gap, 0.0);
        assert_eq!(on_target.gap_percent, Some(0.0));
        assert!(on_target.target_met);

        let ahead = GapAnalysis::derive(&KpiTarget::new("ROAS", 5.0, 4.0, "Q3").with_unit("x"), vec![]);
        assert_eq!(ahead.gap, -1.0);
        assert_eq!(ahead.gap_percent, Some(-0.2));
        assert!(ahead.target_met);
        assert_eq!(ahead.unit, "x");
    }

    #[test]
    fn test_gap_analysis_zero_current_has_no_percent() {
        let gap = GapAnalysis::derive(&KpiTarget::new("Conversions", 0.0, 10.0, "Q3"), vec![]);
        assert_eq!(gap.gap, 10.0);
        assert_eq!(gap.gap_percent, None);
        assert!(!gap.target_met);
    }

    #[test]
    fn test_insights_requires_all_sections() {
        let complete = json!({
            "current_state": {"summary": "ROAS trails target"},
            "key_insights": ["c-1 wastes spend"],
            "risk_areas": [],
            "opportunities": ["shift budget"]
        });
        assert!(insights(complete.clone()).is_ok());

        for field in ["risk_areas", "opportunities", "key_insights", "current_state"] {
            let mut partial = complete.clone();
            partial.as_object_mut().unwrap().remove(field);
            let err = insights(partial).unwrap_err();
            assert!(err.contains(field), "{}: {}", field, err);
        }

        let mut no_summary = complete.clone();
        no_summary["current_state"] = json!({});
        assert!(insights(no_summary).unwrap_err().contains("summary"));

        let mut blank_summary = complete;
        blank_summary["current_state"] = json!({"summary": " "});
        assert!(insights(blank_summary).is_err());
    }

    #[test]
    fn test_insights_schema_marks_required_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(InsightsReport)).unwrap();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        for field in ["current_state", "key_insights", "risk_areas", "opportunities"] {
            assert!(required.contains(&field), "{} not required", field);
        }
        assert!(!required.contains(&"gap_analysis"));
    }
}
