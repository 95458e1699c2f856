use anyhow::Result;

use crate::generator::orchestrator::CompletedReport;
use crate::generator::stages::types::{Recommendation, StrategyPlan};

/// 每个档位在摘要中展示的最大建议数
const MAX_PER_TIER: usize = 3;

/// 面向营销人员的文本摘要
pub struct SummaryGenerator {
    plan: StrategyPlan,
    total_ms: u64,
}

impl SummaryGenerator {
    pub fn new(plan: StrategyPlan, total_ms: u64) -> Self {
        Self { plan, total_ms }
    }

    pub fn from_report(report: &CompletedReport) -> Result<Self> {
        let plan: StrategyPlan = serde_json::from_value(report.strategy_plan.clone())?;
        Ok(Self::new(plan, report.timing.total_ms))
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(80);
        let mut content = format!("{}\nFINAL ANALYSIS AND STRATEGY REPORT\n{}\n", rule, rule);

        content.push_str(&format!("\nEXECUTIVE SUMMARY: {}\n", self.plan.executive_summary));
        content.push_str(&format!("ESTIMATED TIMELINE: {}\n", self.plan.timeline));

        let tiers = [
            ("⚡ Quick Wins", &self.plan.quick_wins),
            ("📈 Medium Effort", &self.plan.medium_effort),
            ("🚀 High Effort", &self.plan.high_effort),
        ];
        for (title, recommendations) in tiers {
            content.push_str(&Self::render_tier(title, recommendations));
        }

        if !self.plan.metrics_to_track.is_empty() {
            content.push_str("\nMETRICS TO TRACK:\n");
            for metric in &self.plan.metrics_to_track {
                content.push_str(&format!("  - {}\n", metric));
            }
        }

        content.push_str(&format!(
            "\n总执行时间: {:.2}秒\n",
            self.total_ms as f64 / 1000.0
        ));
        content
    }

    fn render_tier(title: &str, recommendations: &[Recommendation]) -> String {
        let mut content = format!(
            "\n--- {} ({} Recommendations) ---\n",
            title,
            recommendations.len()
        );
        for rec in recommendations.iter().take(MAX_PER_TIER) {
            content.push_str(&format!("  • {}: {}\n", rec.title, rec.description));
        }
        content
    }
}
