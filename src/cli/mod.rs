use crate::config::{Config, LLMProvider, WarehouseBackend};
use crate::i18n::TargetLanguage;
use crate::types::KpiTarget;
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 默认配置文件名，位于当前工作目录
pub const DEFAULT_CONFIG_FILE: &str = "kpi-engine.toml";

/// KPI Engine - 由Rust与AI驱动的广告KPI诊断与策略引擎
#[derive(Parser, Debug)]
#[command(name = "kpi-engine")]
#[command(
    about = "Diagnoses why an advertising KPI is missing its target and builds a tiered action plan from warehouse data."
)]
#[command(version)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// KPI名称，如 ROAS
    #[arg(short, long)]
    pub metric: Option<String>,

    /// KPI当前值
    #[arg(long)]
    pub current: Option<f64>,

    /// KPI目标值
    #[arg(long)]
    pub target: Option<f64>,

    /// 目标时间窗口，如 Q3
    #[arg(long)]
    pub timeframe: Option<String>,

    /// 指标单位
    #[arg(long)]
    pub unit: Option<String>,

    /// 自然语言描述的目标，作为额外上下文
    #[arg(long)]
    pub goal: Option<String>,

    /// 从TOML文件读取KPI目标
    #[arg(long)]
    pub kpi_file: Option<PathBuf>,

    /// 报告输出目录
    #[arg(short, long)]
    pub output_path: Option<PathBuf>,

    /// GCP项目
    #[arg(long)]
    pub project_id: Option<String>,

    /// BigQuery数据集
    #[arg(long)]
    pub dataset_id: Option<String>,

    /// 广告效果表
    #[arg(long)]
    pub table: Option<String>,

    /// 数据仓库后端 (bigquery, fixture)
    #[arg(long)]
    pub warehouse: Option<String>,

    /// fixture后端的数据文件
    #[arg(long)]
    pub fixture_path: Option<PathBuf>,

    /// 向Research阶段开放自然语言查询工具
    #[arg(long)]
    pub enable_nl2sql: bool,

    /// 单个阶段允许的最大模型调用轮数
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// 整条流水线的截止时间（秒）
    #[arg(long)]
    pub deadline_seconds: Option<u64>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,

    /// 高能效模型，用于Insights与Planning阶段
    #[arg(long)]
    pub model_efficient: Option<String>,

    /// 高质量模型，用于Research阶段
    #[arg(long)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long)]
    pub llm_api_key: Option<String>,

    /// 最大tokens数
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// 温度参数
    #[arg(long)]
    pub temperature: Option<f64>,

    /// LLM Provider (openai, moonshot, deepseek, mistral, openrouter, anthropic, gemini, ollama)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// 目标语言 (zh, en, ja, ko, de, fr, ru)
    #[arg(long)]
    pub target_language: Option<String>,
}

/// `--kpi-file` 的内容，既可以是裸的KPI表，也可以包在 `[kpi]` 中
#[derive(Deserialize)]
#[serde(untagged)]
enum KpiFile {
    Wrapped { kpi: KpiTarget },
    Bare(KpiTarget),
}

fn load_kpi_file(path: &Path) -> Result<KpiTarget> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read KPI file: {:?}", path))?;
    let file: KpiFile = toml::from_str(&content).context("Failed to parse KPI file")?;
    Ok(match file {
        KpiFile::Wrapped { kpi } => kpi,
        KpiFile::Bare(kpi) => kpi,
    })
}

impl Args {
    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            // 如果显式指定了配置文件路径，从该路径加载
            Some(config_path) => Config::from_file(config_path)?,
            None => {
                // 如果没有显式指定配置文件，尝试从默认位置加载
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);
                if default_config_path.exists() {
                    Config::from_file(&default_config_path)?
                } else {
                    Config::default()
                }
            }
        };

        // KPI目标：--kpi-file 优先，其次是命令行参数，最后是配置文件
        if let Some(kpi_file) = &self.kpi_file {
            config.kpi = Some(load_kpi_file(kpi_file)?);
        }
        if let Some(kpi) = self.kpi_from_flags(config.kpi.take())? {
            config.kpi = Some(kpi);
        }

        if let Some(output_path) = self.output_path {
            config.output_path = Some(output_path);
        }

        // 覆盖数据仓库配置
        if let Some(project_id) = self.project_id {
            config.warehouse.location.project_id = project_id;
        }
        if let Some(dataset_id) = self.dataset_id {
            config.warehouse.location.dataset_id = dataset_id;
        }
        if let Some(table) = self.table {
            config.warehouse.location.table = table;
        }
        if let Some(backend) = self.warehouse {
            config.warehouse.backend = backend
                .parse::<WarehouseBackend>()
                .map_err(|e| anyhow!(e))?;
        }
        if let Some(fixture_path) = self.fixture_path {
            config.warehouse.fixture_path = Some(fixture_path);
        }
        if self.enable_nl2sql {
            config.warehouse.enable_nl2sql = true;
        }

        if let Some(max_turns) = self.max_turns {
            config.runner.max_turns = max_turns;
        }
        if let Some(deadline_seconds) = self.deadline_seconds {
            config.pipeline.deadline_seconds = Some(deadline_seconds);
        }

        // 覆盖LLM配置
        if let Some(provider_str) = self.llm_provider {
            match provider_str.parse::<LLMProvider>() {
                Ok(provider) => config.llm.provider = provider,
                Err(_) => tracing::warn!(
                    "⚠️ 警告: 未知的provider: {}，使用默认provider",
                    provider_str
                ),
            }
        }
        if let Some(llm_api_base_url) = self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url;
        }
        if let Some(llm_api_key) = self.llm_api_key {
            config.llm.api_key = llm_api_key;
        }
        if let Some(model_efficient) = self.model_efficient {
            config.llm.model_efficient = model_efficient;
        }
        if let Some(model_powerful) = self.model_powerful {
            config.llm.model_powerful = model_powerful;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }

        // 目标语言配置
        if let Some(target_language_str) = self.target_language {
            match target_language_str.parse::<TargetLanguage>() {
                Ok(target_language) => config.target_language = target_language,
                Err(_) => tracing::warn!(
                    "⚠️ 警告: 未知的目标语言: {}，使用默认语言 (English)",
                    target_language_str
                ),
            }
        }

        if self.verbose {
            config.verbose = true;
        }

        Ok(config)
    }

    /// 用命令行参数构建或覆盖KPI目标
    fn kpi_from_flags(&self, base: Option<KpiTarget>) -> Result<Option<KpiTarget>> {
        let any_flag = self.metric.is_some()
            || self.current.is_some()
            || self.target.is_some()
            || self.timeframe.is_some()
            || self.unit.is_some()
            || self.goal.is_some();
        if !any_flag {
            return Ok(base);
        }

        let mut kpi = match base {
            Some(kpi) => kpi,
            None => {
                let (Some(metric), Some(current), Some(target)) =
                    (&self.metric, self.current, self.target)
                else {
                    bail!("--metric, --current and --target are required to define a KPI");
                };
                KpiTarget::new(metric.clone(), current, target, "")
            }
        };

        if let Some(metric) = &self.metric {
            kpi.metric = metric.clone();
        }
        if let Some(current) = self.current {
            kpi.current_value = current;
        }
        if let Some(target) = self.target {
            kpi.target_value = target;
        }
        if let Some(timeframe) = &self.timeframe {
            kpi.timeframe = timeframe.clone();
        }
        if let Some(unit) = &self.unit {
            kpi.unit = unit.clone();
        }
        if let Some(goal) = &self.goal {
            kpi.goal = Some(goal.clone());
        }
        Ok(Some(kpi))
    }
}
