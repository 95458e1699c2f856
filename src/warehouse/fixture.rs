//! 内存样本仓库，在本地对固定查询形态求值

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::metrics::MetricTotals;
use super::{QueryFilters, QueryShape, Row, Warehouse, WarehouseQuery};
use crate::error::DataAccessError;

/// 一条按日、按广告系列聚合的投放记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    pub date: NaiveDate,
    pub campaign_id: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub cost: f64,
    pub conversions: f64,
    pub revenue: f64,
    #[serde(default)]
    pub clicks: f64,
    #[serde(default)]
    pub impressions: f64,
}

impl PerformanceRecord {
    fn totals(&self) -> MetricTotals {
        MetricTotals {
            cost: self.cost,
            conversions: self.conversions,
            revenue: self.revenue,
            clicks: self.clicks,
            impressions: self.impressions,
        }
    }

    fn dimension_value(&self, dimension: &str) -> Option<String> {
        match dimension {
            "campaign_id" => Some(self.campaign_id.clone()),
            "device" => Some(self.device.clone().unwrap_or_else(|| "unknown".to_string())),
            "region" => Some(self.region.clone().unwrap_or_else(|| "unknown".to_string())),
            "date" => Some(self.date.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixtureWarehouse {
    records: Vec<PerformanceRecord>,
}

impl FixtureWarehouse {
    pub fn new(records: Vec<PerformanceRecord>) -> Self {
        Self { records }
    }

    /// 从JSON数组文件加载样本数据
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read fixture file: {:?}", path))?;
        let records: Vec<PerformanceRecord> =
            serde_json::from_str(&content).context("Failed to parse fixture records")?;
        Ok(Self::new(records))
    }

    pub fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }

    fn filtered<'a>(
        &'a self,
        filters: &'a QueryFilters,
    ) -> impl Iterator<Item = &'a PerformanceRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| filters.matches(r.date, &r.campaign_id))
    }

    fn current_metrics(&self, filters: &QueryFilters) -> Vec<Row> {
        let mut totals = MetricTotals::default();
        let mut matched = false;
        for record in self.filtered(filters) {
            totals.add(&record.totals());
            matched = true;
        }
        if matched { vec![totals.to_row()] } else { Vec::new() }
    }

    fn grouped(
        &self,
        dimension: &str,
        filters: &QueryFilters,
    ) -> Result<BTreeMap<String, MetricTotals>, DataAccessError> {
        let mut groups: BTreeMap<String, MetricTotals> = BTreeMap::new();
        for record in self.filtered(filters) {
            let key = record.dimension_value(dimension).ok_or_else(|| {
                DataAccessError::Rejected(format!("unknown column '{}'", dimension))
            })?;
            groups.entry(key).or_default().add(&record.totals());
        }
        Ok(groups)
    }

    fn segment_breakdown(
        &self,
        dimension: &str,
        limit: Option<usize>,
        filters: &QueryFilters,
    ) -> Result<Vec<Row>, DataAccessError> {
        let mut segments: Vec<(String, MetricTotals)> =
            self.grouped(dimension, filters)?.into_iter().collect();
        // 与SQL一致：cost降序，同cost按segment升序
        segments.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = limit {
            segments.truncate(limit);
        }

        Ok(segments
            .into_iter()
            .map(|(segment, totals)| {
                let mut row = Row::new();
                row.insert("segment".to_string(), Value::String(segment));
                totals.write_into(&mut row);
                row
            })
            .collect())
    }

    fn time_series(&self, filters: &QueryFilters) -> Result<Vec<Row>, DataAccessError> {
        Ok(self
            .grouped("date", filters)?
            .into_iter()
            .map(|(date, totals)| {
                let mut row = Row::new();
                row.insert("date".to_string(), Value::String(date));
                totals.write_into(&mut row);
                row
            })
            .collect())
    }
}

#[async_trait]
impl Warehouse for FixtureWarehouse {
    async fn execute(&self, query: &WarehouseQuery) -> Result<Vec<Row>, DataAccessError> {
        match &query.shape {
            QueryShape::CurrentMetrics => Ok(self.current_metrics(&query.filters)),
            QueryShape::SegmentBreakdown { dimension, limit } => {
                self.segment_breakdown(dimension, *limit, &query.filters)
            }
            QueryShape::TimeSeries => self.time_series(&query.filters),
            QueryShape::RawSql => Err(DataAccessError::Rejected(
                "fixture warehouse cannot execute raw SQL".to_string(),
            )),
        }
    }
}
