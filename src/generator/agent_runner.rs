//! 有界的 推理 → 工具调用 → 再推理 对话循环

use crate::error::{ReasoningError, StageError};
use crate::generator::artifact_log::StageTrace;
use crate::generator::stages::types::StageOutput;
use crate::llm::client::types::{
    ConversationTurn, ModelReply, ModelTier, ReasoningRequest, Role, ToolCallResult,
};
use crate::llm::client::{ReasoningService, respond_with_retry};
use crate::llm::tools::ToolRegistry;
use crate::utils::json_extract::extract_json_object;
use crate::utils::retry::RetryPolicy;

/// 单个阶段的对话执行器
pub struct AgentRunner<'a> {
    reasoner: &'a dyn ReasoningService,
    policy: &'a RetryPolicy,
    max_turns: usize,
}

impl<'a> AgentRunner<'a> {
    pub fn new(reasoner: &'a dyn ReasoningService, policy: &'a RetryPolicy, max_turns: usize) -> Self {
        Self {
            reasoner,
            policy,
            max_turns: max_turns.max(1),
        }
    }

    /// 运行对话直到得到通过校验的 `T`
    ///
    /// 每次模型调用计为一轮（重试不计）。最终答案无法解析时，允许在剩余轮数内
    /// 追加一次纠正提示；第二次仍然失败即为 `SchemaViolation`。
    pub async fn run<T: StageOutput>(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        registry: &ToolRegistry,
        tier: ModelTier,
        trace: &mut StageTrace,
    ) -> Result<T, StageError> {
        trace.push(ConversationTurn::system(system_prompt));
        trace.push(ConversationTurn::user(task_prompt));

        let tools = registry.definitions();
        let mut corrected = false;

        loop {
            let request = ReasoningRequest {
                system_prompt: system_prompt.to_string(),
                conversation: trace
                    .turns
                    .iter()
                    .filter(|turn| turn.role != Role::System)
                    .cloned()
                    .collect(),
                tools: tools.clone(),
                tier,
            };

            trace.model_calls += 1;
            let reply = respond_with_retry(self.reasoner, &request, self.policy)
                .await
                .map_err(|e| match e {
                    ReasoningError::Timeout(_) => StageError::DeadlineExceeded(e.to_string()),
                    other => StageError::Model(other.to_string()),
                })?;

            let text = match reply {
                ModelReply::ToolCalls(calls) if !calls.is_empty() => {
                    tracing::debug!(
                        stage = %trace.stage,
                        turn = trace.model_calls,
                        "🔧 模型请求 {} 个工具调用",
                        calls.len()
                    );
                    trace.push(ConversationTurn::tool_calls(calls.clone()));

                    // 没有剩余轮数读取结果时不再派发
                    if trace.model_calls >= self.max_turns {
                        return Err(StageError::NonTermination {
                            max_turns: self.max_turns,
                        });
                    }

                    let outcomes = registry.resolve_all(&calls).await;
                    for (call, outcome) in calls.iter().zip(outcomes) {
                        match outcome {
                            Ok(result) => trace.push(ConversationTurn::tool_result(result)),
                            Err(e) => {
                                trace.push(ConversationTurn::tool_result(ToolCallResult::failed(
                                    call, &e, 0,
                                )));
                                return Err(StageError::DataAccess(e));
                            }
                        }
                    }
                    continue;
                }
                ModelReply::ToolCalls(_) => String::new(),
                ModelReply::Final(text) => text,
            };

            trace.push(ConversationTurn::assistant(text.as_str()));
            match parse_output::<T>(&text) {
                Ok(output) => return Ok(output),
                Err(reason) => {
                    if corrected || trace.model_calls >= self.max_turns {
                        return Err(StageError::SchemaViolation(reason));
                    }
                    tracing::warn!(stage = %trace.stage, "⚠️ 输出未通过校验，请求模型修正: {}", reason);
                    corrected = true;
                    trace.push(ConversationTurn::user(correction_prompt(&reason)));
                }
            }
        }
    }
}

/// 解析并校验最终答案
fn parse_output<T: StageOutput>(text: &str) -> Result<T, String> {
    let json = extract_json_object(text).ok_or_else(|| "the reply contains no JSON object".to_string())?;
    let output: T = serde_json::from_str(json).map_err(|e| format!("invalid JSON for the required schema: {}", e))?;
    output.validate()?;
    Ok(output)
}

fn correction_prompt(reason: &str) -> String {
    format!(
        "Your previous answer could not be accepted: {}\n\nReply again with only a single JSON object that matches the required schema exactly. Do not call any more tools.",
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasoningError;
    use crate::generator::stages::types::{InsightsReport, StageName};
    use crate::llm::client::ScriptedReasoner;
    use crate::llm::client::types::{ToolCallRequest, TurnContent};
    use serde_json::json;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, 1, 5)
    }

    fn valid_insights() -> String {
        json!({
            "current_state": {"metric": "ROAS", "value": 2.1, "summary": "below target"},
            "key_insights": ["mobile spend converts poorly"],
            "risk_areas": ["mobile"],
            "opportunities": ["shift budget to desktop"]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_final_answer_is_parsed() {
        let reasoner = ScriptedReasoner::new(vec![ModelReply::Final(format!(
            "Here you go:\n```json\n{}\n```",
            valid_insights()
        ))]);
        let policy = policy();
        let runner = AgentRunner::new(&reasoner, &policy, 4);
        let mut trace = StageTrace::new(StageName::Insights);

        let report: InsightsReport = runner
            .run("sys", "task", &ToolRegistry::new(), ModelTier::Efficient, &mut trace)
            .await
            .unwrap();

        assert_eq!(report.key_insights.len(), 1);
        assert_eq!(trace.model_calls, 1);
        assert_eq!(trace.turns[0].role, Role::System);
        // 请求中不包含系统消息
        assert_eq!(reasoner.requests()[0].conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_consume_turns() {
        let call = ToolCallRequest::new("c1", "missing_tool", json!({}));
        let reasoner = ScriptedReasoner::repeating(ModelReply::ToolCalls(vec![call]));
        let policy = policy();
        let runner = AgentRunner::new(&reasoner, &policy, 3);
        let mut trace = StageTrace::new(StageName::Insights);

        let err = runner
            .run::<InsightsReport>("sys", "task", &ToolRegistry::new(), ModelTier::Efficient, &mut trace)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::NonTermination { max_turns: 3 }));
        assert_eq!(reasoner.call_count(), 3);
        let failed_results = trace
            .turns
            .iter()
            .filter(|t| matches!(&t.content, TurnContent::ToolResult(r) if !r.success))
            .count();
        // 最后一轮的请求只记录，不派发
        assert_eq!(failed_results, 2);
        assert!(matches!(
            &trace.turns.last().unwrap().content,
            TurnContent::ToolCalls(calls) if calls.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_one_correction_is_allowed() {
        let reasoner = ScriptedReasoner::new(vec![
            ModelReply::Final("I think ROAS is low.".to_string()),
            ModelReply::Final(valid_insights()),
        ]);
        let policy = policy();
        let runner = AgentRunner::new(&reasoner, &policy, 4);
        let mut trace = StageTrace::new(StageName::Insights);

        let report: InsightsReport = runner
            .run("sys", "task", &ToolRegistry::new(), ModelTier::Efficient, &mut trace)
            .await
            .unwrap();
        assert_eq!(report.current_state.metric, "ROAS");
        assert_eq!(trace.model_calls, 2);
    }

    #[tokio::test]
    async fn test_second_invalid_answer_is_schema_violation() {
        let reasoner = ScriptedReasoner::repeating(ModelReply::Final(
            json!({"current_state": {}, "key_insights": []}).to_string(),
        ));
        let policy = policy();
        let runner = AgentRunner::new(&reasoner, &policy, 6);
        let mut trace = StageTrace::new(StageName::Insights);

        let err = runner
            .run::<InsightsReport>("sys", "task", &ToolRegistry::new(), ModelTier::Efficient, &mut trace)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::SchemaViolation(_)));
        assert_eq!(reasoner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_required_section_is_corrected_then_rejected() {
        let without_risks = json!({
            "current_state": {"summary": "below target"},
            "key_insights": ["mobile spend converts poorly"],
            "opportunities": ["shift budget to desktop"]
        })
        .to_string();
        let reasoner = ScriptedReasoner::repeating(ModelReply::Final(without_risks));
        let policy = policy();
        let runner = AgentRunner::new(&reasoner, &policy, 6);
        let mut trace = StageTrace::new(StageName::Insights);

        let err = runner
            .run::<InsightsReport>("sys", "task", &ToolRegistry::new(), ModelTier::Efficient, &mut trace)
            .await
            .unwrap_err();

        let StageError::SchemaViolation(reason) = &err else {
            panic!("expected schema violation, got {:?}", err);
        };
        assert!(reason.contains("risk_areas"));
        assert_eq!(reasoner.call_count(), 2);
        let correction = reasoner.requests()[1].conversation.last().cloned().unwrap();
        assert!(matches!(&correction.content, TurnContent::Text(t) if t.contains("risk_areas")));
    }

    #[tokio::test]
    async fn test_model_timeout_is_deadline_exceeded() {
        let reasoner = ScriptedReasoner::from_outcomes(vec![Err(ReasoningError::Timeout(5))]);
        let policy = RetryPolicy::new(1, 1, 5);
        let runner = AgentRunner::new(&reasoner, &policy, 4);
        let mut trace = StageTrace::new(StageName::Research);

        let err = runner
            .run::<InsightsReport>("sys", "task", &ToolRegistry::new(), ModelTier::Powerful, &mut trace)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::DeadlineExceeded(_)));
    }
}
