//! 固定的三类只读查询：当前汇总、分组拆解、时间序列

use super::{QueryFilters, QueryParameter, QueryShape, WarehouseQuery};
use crate::types::WarehouseLocation;

const METRIC_COLUMNS: &str = "SUM(cost) AS cost,
  SUM(conversions) AS conversions,
  SUM(revenue) AS revenue,
  SUM(clicks) AS clicks,
  SUM(impressions) AS impressions,
  SAFE_DIVIDE(SUM(revenue), SUM(cost)) AS roas,
  SAFE_DIVIDE(SUM(cost), SUM(conversions)) AS cpa";

/// 由过滤条件生成 WHERE 子句与命名参数
fn where_clause(filters: &QueryFilters) -> (String, Vec<QueryParameter>) {
    let mut conditions = vec!["TRUE".to_string()];
    let mut parameters = Vec::new();

    if let Some(start) = filters.start_date {
        conditions.push("date >= @start_date".to_string());
        parameters.push(QueryParameter::date("start_date", start));
    }
    if let Some(end) = filters.end_date {
        conditions.push("date <= @end_date".to_string());
        parameters.push(QueryParameter::date("end_date", end));
    }
    if let Some(campaign_id) = &filters.campaign_id {
        conditions.push("campaign_id = @campaign_id".to_string());
        parameters.push(QueryParameter::string("campaign_id", campaign_id));
    }

    (conditions.join(" AND "), parameters)
}

pub fn current_metrics(location: &WarehouseLocation, filters: &QueryFilters) -> WarehouseQuery {
    let (predicate, parameters) = where_clause(filters);
    let sql = format!(
        "SELECT\n  {}\nFROM {}\nWHERE {}",
        METRIC_COLUMNS,
        location.qualified_table(),
        predicate
    );

    WarehouseQuery {
        shape: QueryShape::CurrentMetrics,
        location: location.clone(),
        filters: filters.clone(),
        sql,
        parameters,
    }
}

/// `dimension` 必须已经通过白名单校验，标识符无法参数化
pub fn segment_breakdown(
    location: &WarehouseLocation,
    dimension: &str,
    limit: Option<usize>,
    filters: &QueryFilters,
) -> WarehouseQuery {
    let (predicate, parameters) = where_clause(filters);
    let mut sql = format!(
        "SELECT\n  {} AS segment,\n  {}\nFROM {}\nWHERE {}\nGROUP BY segment\nORDER BY cost DESC, segment ASC",
        dimension,
        METRIC_COLUMNS,
        location.qualified_table(),
        predicate
    );
    if let Some(limit) = limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }

    WarehouseQuery {
        shape: QueryShape::SegmentBreakdown {
            dimension: dimension.to_string(),
            limit,
        },
        location: location.clone(),
        filters: filters.clone(),
        sql,
        parameters,
    }
}

pub fn time_series(location: &WarehouseLocation, filters: &QueryFilters) -> WarehouseQuery {
    let (predicate, parameters) = where_clause(filters);
    let sql = format!(
        "SELECT\n  CAST(date AS STRING) AS date,\n  {}\nFROM {}\nWHERE {}\nGROUP BY date\nORDER BY date ASC",
        METRIC_COLUMNS,
        location.qualified_table(),
        predicate
    );

    WarehouseQuery {
        shape: QueryShape::TimeSeries,
        location: location.clone(),
        filters: filters.clone(),
        sql,
        parameters,
    }
}

/// 已通过只读校验的自由SQL
pub fn raw_sql(location: &WarehouseLocation, sql: String) -> WarehouseQuery {
    WarehouseQuery {
        shape: QueryShape::RawSql,
        location: location.clone(),
        filters: QueryFilters::default(),
        sql,
        parameters: Vec::new(),
    }
}
