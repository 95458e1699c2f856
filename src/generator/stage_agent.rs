use async_trait::async_trait;
use std::time::Instant;

use crate::config::Config;
use crate::error::StageError;
use crate::generator::agent_runner::AgentRunner;
use crate::generator::artifact_log::{StageArtifact, StageTrace};
use crate::generator::context::PipelineContext;
use crate::generator::stages::types::{GapAnalysis, StageName, StageOutput};
use crate::llm::client::types::ModelTier;
use crate::llm::tools::warehouse_tools::build_registry;

/// Prompt模板配置
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// 系统提示词
    pub system_prompt: String,
    /// 开头的说明性指令
    pub opening_instruction: String,
    /// 结尾的强调性指令
    pub closing_instruction: String,
}

/// 阶段任务提示词构建器：开头指令 + 诊断材料 + 输出格式 + 结尾指令
pub struct StagePromptBuilder<'a> {
    template: &'a PromptTemplate,
}

impl<'a> StagePromptBuilder<'a> {
    pub fn new(template: &'a PromptTemplate) -> Self {
        Self { template }
    }

    pub fn build<T: StageOutput>(
        &self,
        context: &PipelineContext,
        prior: &[&StageArtifact],
    ) -> Result<String, StageError> {
        let mut prompt = String::new();

        prompt.push_str(&self.template.opening_instruction);
        prompt.push_str("\n\n");

        prompt.push_str("## KPI Target\n");
        let gap = GapAnalysis::derive(&context.kpi, Vec::new());
        prompt.push_str(&to_pretty(&serde_json::json!({
            "kpi": context.kpi,
            "gap": gap.gap,
            "gap_percent": gap.gap_percent,
            "target_met": gap.target_met,
        }))?);
        prompt.push_str("\n\n");

        prompt.push_str(&format!("## Data Source\n{}\n\n", context.location));

        for artifact in prior {
            prompt.push_str(&format!(
                "## Output of the {} stage\n{}\n\n",
                artifact.stage(),
                to_pretty(artifact.payload())?
            ));
        }

        let schema = schemars::schema_for!(T);
        prompt.push_str("## Required Output\nYour final answer must be a single JSON object matching this JSON Schema:\n");
        prompt.push_str(&to_pretty(&schema)?);
        prompt.push_str("\n\n");

        prompt.push_str(&self.template.closing_instruction);
        Ok(prompt)
    }
}

fn to_pretty<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, StageError> {
    serde_json::to_string_pretty(value).map_err(|e| StageError::SchemaViolation(e.to_string()))
}

/// 诊断阶段Agent：声明工具、依赖与提示词，执行逻辑完全标准化
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// 阶段输出类型
    type Output: StageOutput;

    fn stage(&self) -> StageName;

    /// 开始前必须存在的上游产物
    fn required_artifacts(&self) -> Vec<StageName> {
        Vec::new()
    }

    /// 本阶段可用的工具名
    fn tool_names(&self, _config: &Config) -> Vec<&'static str> {
        Vec::new()
    }

    fn model_tier(&self) -> ModelTier {
        ModelTier::Efficient
    }

    fn prompt_template(&self) -> PromptTemplate;

    /// 可选的后处理钩子，在输出写入产物之前执行
    fn post_process(
        &self,
        _output: &mut Self::Output,
        _context: &PipelineContext,
        _trace: &StageTrace,
    ) -> Result<(), StageError> {
        Ok(())
    }

    /// 默认实现的execute方法：检查依赖、构建工具与提示词、运行对话循环
    async fn execute(
        &self,
        context: &PipelineContext,
        prior: &[StageArtifact],
    ) -> Result<StageArtifact, StageError> {
        let started = Instant::now();
        let stage = self.stage();

        // 1. 检查依赖产物
        let mut dependencies = Vec::new();
        for required in self.required_artifacts() {
            let artifact = prior
                .iter()
                .find(|a| a.stage() == required)
                .ok_or(StageError::MissingDependency(required))?;
            dependencies.push(artifact);
        }

        // 2. 按声明构建工具注册表
        let registry = build_registry(
            &self.tool_names(&context.config),
            &context.dal,
            &context.location,
        )?;

        // 3. 构建提示词，并根据目标语言调整
        let mut template = self.prompt_template();
        let language_instruction = context.config.target_language.prompt_instruction();
        template.system_prompt = format!("{}\n\n{}", template.system_prompt, language_instruction);
        let task_prompt = StagePromptBuilder::new(&template).build::<Self::Output>(context, &dependencies)?;

        // 4. 运行对话循环
        tracing::info!(
            stage = %stage,
            tools = ?registry.names(),
            "🤖 Sub-Agent [{}] 开始执行",
            stage
        );
        let runner = AgentRunner::new(
            context.reasoner.as_ref(),
            &context.model_policy,
            context.config.runner.max_turns,
        );
        let mut trace = StageTrace::new(stage);
        let outcome = runner
            .run::<Self::Output>(
                &template.system_prompt,
                &task_prompt,
                &registry,
                self.model_tier(),
                &mut trace,
            )
            .await;

        let result = match outcome {
            Ok(mut output) => self
                .post_process(&mut output, context, &trace)
                .map(|_| output),
            Err(e) => Err(e),
        };

        // 5. 无论成败都保存对话轨迹
        let model_calls = trace.model_calls;
        context.record_trace(trace).await;

        let output = result?;
        let payload = serde_json::to_value(&output)
            .map_err(|e| StageError::SchemaViolation(e.to_string()))?;

        tracing::info!(stage = %stage, model_calls, "✅ Sub-Agent [{}]执行完成", stage);
        Ok(StageArtifact::new(stage, payload, started.elapsed()))
    }
}
