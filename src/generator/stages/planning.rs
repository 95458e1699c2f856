use crate::error::StageError;
use crate::generator::artifact_log::StageTrace;
use crate::generator::context::PipelineContext;
use crate::generator::stage_agent::{PromptTemplate, StageAgent};
use crate::generator::stages::types::{StageName, StrategyPlan};

/// 策略规划：把研究结论转化为分档的行动方案，不访问数据
#[derive(Default)]
pub struct PlanningAgent;

impl StageAgent for PlanningAgent {
    type Output = StrategyPlan;

    fn stage(&self) -> StageName {
        StageName::Planning
    }

    fn required_artifacts(&self) -> Vec<StageName> {
        vec![StageName::Insights, StageName::Research]
    }

    fn prompt_template(&self) -> PromptTemplate {
        PromptTemplate {
            system_prompt: r#"You are a Strategic Planning Expert for paid advertising. You turn confirmed root causes and their supporting data into a prioritized, actionable strategy.
You have no tools. Work only from the reports you are given."#
                .to_string(),
            opening_instruction: r#"Synthesize the insights and research reports below into an action plan that closes the KPI gap.
Group the recommendations into three tiers:
1. quick_wins: low effort, immediate impact
2. medium_effort: moderate effort, significant impact
3. high_effort: high effort, transformational impact
Each recommendation needs a title, a detailed description, the expected impact on the KPI and concrete implementation steps."#
                .to_string(),
            closing_instruction: r#"Tie every recommendation to a finding in the reports. List the metrics_to_track that prove progress and give a realistic timeline within the KPI timeframe.
Reply with the JSON object only. Do not output any other text."#
                .to_string(),
        }
    }

    fn post_process(
        &self,
        output: &mut StrategyPlan,
        _context: &PipelineContext,
        _trace: &StageTrace,
    ) -> Result<(), StageError> {
        output.stamp_effort_levels();
        Ok(())
    }
}
