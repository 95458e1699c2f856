use crate::config::Config;
use crate::generator::stage_agent::{PromptTemplate, StageAgent};
use crate::generator::stages::types::{ResearchReport, StageName};
use crate::llm::client::types::ModelTier;
use crate::llm::tools::warehouse_tools::WarehouseToolKind;

/// 归因研究：用时间序列与分组对比验证Insights阶段提出的假设
#[derive(Default)]
pub struct ResearchAgent;

impl StageAgent for ResearchAgent {
    type Output = ResearchReport;

    fn stage(&self) -> StageName {
        StageName::Research
    }

    fn required_artifacts(&self) -> Vec<StageName> {
        vec![StageName::Insights]
    }

    fn tool_names(&self, config: &Config) -> Vec<&'static str> {
        let mut tools = vec![
            WarehouseToolKind::TimeSeries.name(),
            WarehouseToolKind::SegmentBreakdown.name(),
            WarehouseToolKind::SegmentEfficiency.name(),
        ];
        if config.warehouse.enable_nl2sql {
            tools.push(WarehouseToolKind::NaturalLanguage.name());
        }
        tools
    }

    fn model_tier(&self) -> ModelTier {
        ModelTier::Powerful
    }

    fn prompt_template(&self) -> PromptTemplate {
        PromptTemplate {
            system_prompt: r#"You are a Causal Data Research Specialist for paid advertising. Your input is the anomaly report produced by the KPI monitoring stage.
You test its hypotheses against warehouse data and report only what the data supports."#
                .to_string(),
            opening_instruction: r#"Find the root cause of the KPI gap described below.
1. Use get_time_series to locate trends and breakpoints over time.
2. Use compare_segment_efficiency and get_segment_breakdown to quantify which segments waste spend relative to the account baseline.
3. Mark every hypothesis from the insights report as confirmed, rejected or inconclusive, citing the query results that decide it."#
                .to_string(),
            closing_instruction: r#"Cite concrete numbers from tool results in every evidence field.
When the evidence is sufficient, stop calling tools and reply with the JSON object only, with root_cause and actionable_summary written for a strategy planner."#
                .to_string(),
        }
    }
}
