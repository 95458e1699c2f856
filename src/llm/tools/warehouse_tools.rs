//! 数据仓库工具目录，全部由数据访问层支撑

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{ToolDescriptor, ToolHandler, ToolRegistry};
use crate::error::{RegistryError, ToolError, ToolResolutionError};
use crate::types::WarehouseLocation;
use crate::warehouse::metrics::{MetricTotals, json_optional_number, row_str};
use crate::warehouse::{DataAccessLayer, QueryFilters, Row, safe_divide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseToolKind {
    CurrentMetrics,
    SegmentBreakdown,
    TimeSeries,
    SegmentEfficiency,
    NaturalLanguage,
}

impl WarehouseToolKind {
    pub const ALL: [WarehouseToolKind; 5] = [
        WarehouseToolKind::CurrentMetrics,
        WarehouseToolKind::SegmentBreakdown,
        WarehouseToolKind::TimeSeries,
        WarehouseToolKind::SegmentEfficiency,
        WarehouseToolKind::NaturalLanguage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WarehouseToolKind::CurrentMetrics => "get_current_metrics",
            WarehouseToolKind::SegmentBreakdown => "get_segment_breakdown",
            WarehouseToolKind::TimeSeries => "get_time_series",
            WarehouseToolKind::SegmentEfficiency => "compare_segment_efficiency",
            WarehouseToolKind::NaturalLanguage => "query_warehouse_nl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            WarehouseToolKind::CurrentMetrics => {
                "Aggregate advertising totals (cost, conversions, revenue, clicks, impressions) with ROAS and CPA for the whole account or one campaign. ROAS and CPA are null when their denominator is zero."
            }
            WarehouseToolKind::SegmentBreakdown => {
                "The same metrics grouped by a segment dimension, ordered by cost descending."
            }
            WarehouseToolKind::TimeSeries => {
                "The same metrics grouped by day, ordered by date ascending. Use it to find trends and breakpoints."
            }
            WarehouseToolKind::SegmentEfficiency => {
                "Compares each segment's ROAS and CPA with the account baseline. Segments are ordered worst ROAS first; segments without ROAS come last."
            }
            WarehouseToolKind::NaturalLanguage => {
                "Answers an analytical question the fixed tools cannot, by generating and running one read-only SQL query. Use it sparingly."
            }
        }
    }

    fn parameters(&self, dimensions: &[String]) -> Value {
        let filter_properties = json!({
            "start_date": {
                "type": "string",
                "description": "Inclusive start date, YYYY-MM-DD"
            },
            "end_date": {
                "type": "string",
                "description": "Inclusive end date, YYYY-MM-DD"
            },
            "campaign_id": {
                "type": "string",
                "description": "Restrict to a single campaign"
            }
        });
        let dimension = json!({
            "type": "string",
            "enum": dimensions,
            "description": "Segment dimension, defaults to campaign_id"
        });

        let mut properties = filter_properties;
        let mut required: Vec<&str> = Vec::new();
        match self {
            WarehouseToolKind::CurrentMetrics | WarehouseToolKind::TimeSeries => {}
            WarehouseToolKind::SegmentBreakdown => {
                properties["dimension"] = dimension;
                properties["limit"] = json!({
                    "type": "integer",
                    "description": "Maximum number of segments to return"
                });
            }
            WarehouseToolKind::SegmentEfficiency => {
                properties["dimension"] = dimension;
            }
            WarehouseToolKind::NaturalLanguage => {
                properties = json!({
                    "question": {
                        "type": "string",
                        "description": "The analytical question in plain language"
                    }
                });
                required.push("question");
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }
}

#[derive(Debug, Deserialize)]
struct FilterArgs {
    #[serde(flatten)]
    filters: QueryFilters,
}

#[derive(Debug, Deserialize)]
struct SegmentArgs {
    #[serde(default)]
    dimension: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(flatten)]
    filters: QueryFilters,
}

#[derive(Debug, Deserialize)]
struct QuestionArgs {
    question: String,
}

/// 仓库工具处理函数，绑定到一个数据访问层和一个记录源
pub struct WarehouseToolHandler {
    kind: WarehouseToolKind,
    dal: Arc<DataAccessLayer>,
    location: WarehouseLocation,
}

impl WarehouseToolHandler {
    fn decode<T: for<'de> Deserialize<'de>>(&self, arguments: Value) -> Result<T, ToolError> {
        serde_json::from_value(arguments).map_err(|e| {
            ToolError::Resolution(ToolResolutionError::InvalidArguments {
                tool: self.kind.name().to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn check_filters(&self, filters: &QueryFilters) -> Result<(), ToolError> {
        filters.validate().map_err(|reason| {
            ToolError::Resolution(ToolResolutionError::InvalidArguments {
                tool: self.kind.name().to_string(),
                reason,
            })
        })
    }

    async fn compare_segment_efficiency(
        &self,
        dimension: Option<&str>,
        filters: &QueryFilters,
    ) -> Result<Value, ToolError> {
        let baseline_rows = self.dal.current_metrics(&self.location, filters).await?;
        let segments = self
            .dal
            .segment_breakdown(&self.location, dimension, None, filters)
            .await?;

        let baseline = baseline_rows.first().map(MetricTotals::from_row);
        Ok(json!({
            "dimension": dimension.unwrap_or("campaign_id"),
            "baseline": baseline.map(|b| json!({
                "cost": b.cost,
                "conversions": b.conversions,
                "revenue": b.revenue,
                "roas": json_optional_number(b.roas()),
                "cpa": json_optional_number(b.cpa()),
            })),
            "segments": compare_segments(baseline.as_ref(), &segments),
        }))
    }
}

/// 计算每个分组相对基线的效率差异，ROAS最差的排在最前，无ROAS的排在最后
fn compare_segments(baseline: Option<&MetricTotals>, segments: &[Row]) -> Vec<Value> {
    let baseline_roas = baseline.and_then(MetricTotals::roas);
    let baseline_cpa = baseline.and_then(MetricTotals::cpa);
    let baseline_cost = baseline.map(|b| b.cost).unwrap_or_default();

    let mut compared: Vec<(String, MetricTotals)> = segments
        .iter()
        .map(|row| {
            let segment = row_str(row, "segment").unwrap_or("unknown").to_string();
            (segment, MetricTotals::from_row(row))
        })
        .collect();

    compared.sort_by(|(name_a, a), (name_b, b)| {
        let ordering = match (a.roas(), b.roas()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        ordering.then_with(|| name_a.cmp(name_b))
    });

    compared
        .into_iter()
        .map(|(segment, totals)| {
            let roas = totals.roas();
            let cpa = totals.cpa();
            let roas_delta = roas.zip(baseline_roas).map(|(r, b)| r - b);
            let cpa_delta = cpa.zip(baseline_cpa).map(|(c, b)| c - b);
            json!({
                "segment": segment,
                "cost": totals.cost,
                "conversions": totals.conversions,
                "revenue": totals.revenue,
                "roas": json_optional_number(roas),
                "cpa": json_optional_number(cpa),
                "roas_delta": json_optional_number(roas_delta),
                "roas_delta_percent": json_optional_number(
                    roas_delta.zip(baseline_roas).and_then(|(d, b)| safe_divide(d * 100.0, b))
                ),
                "cpa_delta": json_optional_number(cpa_delta),
                "cost_share": json_optional_number(safe_divide(totals.cost, baseline_cost)),
            })
        })
        .collect()
}

#[async_trait]
impl ToolHandler for WarehouseToolHandler {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        match self.kind {
            WarehouseToolKind::CurrentMetrics => {
                let args: FilterArgs = self.decode(arguments)?;
                self.check_filters(&args.filters)?;
                let rows = self.dal.current_metrics(&self.location, &args.filters).await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            WarehouseToolKind::SegmentBreakdown => {
                let args: SegmentArgs = self.decode(arguments)?;
                self.check_filters(&args.filters)?;
                let rows = self
                    .dal
                    .segment_breakdown(
                        &self.location,
                        args.dimension.as_deref(),
                        args.limit,
                        &args.filters,
                    )
                    .await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            WarehouseToolKind::TimeSeries => {
                let args: FilterArgs = self.decode(arguments)?;
                self.check_filters(&args.filters)?;
                let rows = self.dal.time_series(&self.location, &args.filters).await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            WarehouseToolKind::SegmentEfficiency => {
                let args: SegmentArgs = self.decode(arguments)?;
                self.check_filters(&args.filters)?;
                self.compare_segment_efficiency(args.dimension.as_deref(), &args.filters)
                    .await
            }
            WarehouseToolKind::NaturalLanguage => {
                let args: QuestionArgs = self.decode(arguments)?;
                let result = self
                    .dal
                    .natural_language_query(&self.location, &args.question)
                    .await?;
                Ok(json!({
                    "sql": result.sql,
                    "rows": result.rows,
                }))
            }
        }
    }
}

pub fn descriptor(
    kind: WarehouseToolKind,
    dal: Arc<DataAccessLayer>,
    location: WarehouseLocation,
) -> ToolDescriptor {
    let parameters = kind.parameters(dal.segment_dimensions());
    ToolDescriptor::new(
        kind.name(),
        kind.description(),
        parameters,
        Arc::new(WarehouseToolHandler {
            kind,
            dal,
            location,
        }),
    )
}

/// 按阶段声明的工具名构建注册表
///
/// 名称不在目录中，或自然语言查询未启用时返回 `UnavailableTool`。
pub fn build_registry(
    names: &[&str],
    dal: &Arc<DataAccessLayer>,
    location: &WarehouseLocation,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    for name in names {
        let kind = WarehouseToolKind::from_name(name)
            .ok_or_else(|| RegistryError::UnavailableTool(name.to_string()))?;
        if kind == WarehouseToolKind::NaturalLanguage && !dal.supports_natural_language() {
            return Err(RegistryError::UnavailableTool(name.to_string()));
        }
        registry.register(descriptor(kind, dal.clone(), location.clone()))?;
    }
    Ok(registry)
}
