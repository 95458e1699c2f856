use serde_json::Value;

use crate::config::Config;
use crate::error::StageError;
use crate::generator::artifact_log::StageTrace;
use crate::generator::context::PipelineContext;
use crate::generator::stage_agent::{PromptTemplate, StageAgent};
use crate::generator::stages::types::{GapAnalysis, InsightsReport, StageName};
use crate::llm::tools::warehouse_tools::WarehouseToolKind;
use crate::warehouse::MetricTotals;

/// KPI监控：计算当前表现、与目标的差距以及拖累表现的主要分组
#[derive(Default)]
pub struct InsightsAgent;

impl InsightsAgent {
    /// 在对话轨迹中查找账户级的 get_current_metrics 结果
    ///
    /// 优先使用未按campaign过滤的调用，否则退回到第一个非空结果。
    fn grounded_totals(trace: &StageTrace) -> Option<MetricTotals> {
        let tool = WarehouseToolKind::CurrentMetrics.name();
        let mut fallback = None;

        for result in trace.successful_results(tool) {
            let Some(row) = result
                .payload
                .as_array()
                .and_then(|rows| rows.first())
                .and_then(Value::as_object)
            else {
                continue;
            };

            let scoped = trace
                .request_for(&result.call_id)
                .and_then(|request| request.arguments.get("campaign_id"))
                .is_some_and(|campaign| !campaign.is_null());
            if !scoped {
                return Some(MetricTotals::from_row(row));
            }
            if fallback.is_none() {
                fallback = Some(MetricTotals::from_row(row));
            }
        }

        fallback
    }
}

impl StageAgent for InsightsAgent {
    type Output = InsightsReport;

    fn stage(&self) -> StageName {
        StageName::Insights
    }

    fn tool_names(&self, _config: &Config) -> Vec<&'static str> {
        vec![
            WarehouseToolKind::CurrentMetrics.name(),
            WarehouseToolKind::SegmentBreakdown.name(),
        ]
    }

    fn prompt_template(&self) -> PromptTemplate {
        PromptTemplate {
            system_prompt: r#"You are a KPI Monitoring Specialist for paid advertising. You measure current performance from warehouse data with the tools you are given and compare it with the marketer's target KPI.
Never invent a number: every figure you report must come from a tool result in this conversation."#
                .to_string(),
            opening_instruction: r#"Assess the current state of the KPI below and explain the gap to its target.
1. Call get_current_metrics without a campaign filter to measure the account as a whole.
2. Call get_segment_breakdown (campaign_id first, then device or region if useful) to find the segments with the largest negative deviation from the account.
3. Identify at most 3 underperforming segments, the risk areas, the opportunities, and the hypotheses a researcher should test next."#
                .to_string(),
            closing_instruction: r#"When you have enough evidence, stop calling tools and reply with the JSON object only. Do not output any other text or reasoning.
gap_analysis.top_drivers should name the segments or factors that explain most of the gap."#
                .to_string(),
        }
    }

    fn post_process(
        &self,
        output: &mut InsightsReport,
        context: &PipelineContext,
        trace: &StageTrace,
    ) -> Result<(), StageError> {
        let top_drivers = std::mem::take(&mut output.gap_analysis.top_drivers);
        output.gap_analysis = GapAnalysis::derive(&context.kpi, top_drivers);

        let state = &mut output.current_state;
        state.metric = context.kpi.metric.clone();
        state.value = context.kpi.current_value;

        match Self::grounded_totals(trace) {
            Some(totals) => {
                state.cost = Some(totals.cost);
                state.conversions = Some(totals.conversions);
                state.revenue = Some(totals.revenue);
                state.roas = totals.roas();
                state.cpa = totals.cpa();
            }
            None => {
                tracing::warn!("⚠️ Insights阶段没有成功的 get_current_metrics 结果，清除模型给出的指标数值");
                state.cost = None;
                state.conversions = None;
                state.revenue = None;
                state.roas = None;
                state.cpa = None;
            }
        }
        Ok(())
    }
}
