use serde_json::Value;

use super::Row;

/// 受保护的除法：分母为0（或结果非有限数）时返回None而不是报错
pub fn safe_divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// 读取行中的数值列，字符串形式的数字也会被解析
pub fn row_f64(row: &Row, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn optional_number(value: Option<f64>) -> Value {
    value.map(number).unwrap_or(Value::Null)
}

/// 广告效果累计值
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricTotals {
    pub cost: f64,
    pub conversions: f64,
    pub revenue: f64,
    pub clicks: f64,
    pub impressions: f64,
}

impl MetricTotals {
    pub fn add(&mut self, other: &MetricTotals) {
        self.cost += other.cost;
        self.conversions += other.conversions;
        self.revenue += other.revenue;
        self.clicks += other.clicks;
        self.impressions += other.impressions;
    }

    /// 广告支出回报率 revenue / cost
    pub fn roas(&self) -> Option<f64> {
        safe_divide(self.revenue, self.cost)
    }

    /// 单次转化成本 cost / conversions
    pub fn cpa(&self) -> Option<f64> {
        safe_divide(self.cost, self.conversions)
    }

    /// 写入与SQL查询一致的列：cost、conversions、revenue、clicks、impressions、roas、cpa
    pub fn write_into(&self, row: &mut Row) {
        row.insert("cost".to_string(), number(self.cost));
        row.insert("conversions".to_string(), number(self.conversions));
        row.insert("revenue".to_string(), number(self.revenue));
        row.insert("clicks".to_string(), number(self.clicks));
        row.insert("impressions".to_string(), number(self.impressions));
        row.insert("roas".to_string(), optional_number(self.roas()));
        row.insert("cpa".to_string(), optional_number(self.cpa()));
    }

    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        self.write_into(&mut row);
        row
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            cost: row_f64(row, "cost").unwrap_or_default(),
            conversions: row_f64(row, "conversions").unwrap_or_default(),
            revenue: row_f64(row, "revenue").unwrap_or_default(),
            clicks: row_f64(row, "clicks").unwrap_or_default(),
            impressions: row_f64(row, "impressions").unwrap_or_default(),
        }
    }
}

pub(crate) fn json_optional_number(value: Option<f64>) -> Value {
    optional_number(value)
}
