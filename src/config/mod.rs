use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::i18n::TargetLanguage;
use crate::types::{KpiTarget, WarehouseLocation};

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Mistral => write!(f, "mistral"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Gemini => write!(f, "gemini"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "mistral" => Ok(LLMProvider::Mistral),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "gemini" => Ok(LLMProvider::Gemini),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 数据仓库后端类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum WarehouseBackend {
    #[serde(rename = "bigquery")]
    #[default]
    BigQuery,
    /// 本地JSON样本数据，用于离线运行
    #[serde(rename = "fixture")]
    Fixture,
}

impl std::str::FromStr for WarehouseBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bigquery" | "bq" => Ok(WarehouseBackend::BigQuery),
            "fixture" => Ok(WarehouseBackend::Fixture),
            _ => Err(format!("Unknown warehouse backend: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 报告叙述文字的目标语言
    pub target_language: TargetLanguage,

    /// 报告输出目录，为空时只输出到stdout
    pub output_path: Option<PathBuf>,

    /// 是否启用详细日志
    pub verbose: bool,

    /// 待诊断的KPI，也可以通过命令行提供
    pub kpi: Option<KpiTarget>,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 数据仓库配置
    pub warehouse: WarehouseConfig,

    /// Agent对话循环配置
    pub runner: RunnerConfig,

    /// 流水线配置
    pub pipeline: PipelineConfig,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 高能效模型，用于Insights与Planning阶段
    pub model_efficient: String,

    /// 高质量模型，用于Research阶段的深度归因分析
    pub model_powerful: String,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 重试次数
    pub retry_attempts: u32,

    /// 首次重试间隔（毫秒），之后指数递增
    pub retry_delay_ms: u64,

    /// 单次模型调用超时时间（秒）
    pub timeout_seconds: u64,
}

/// 数据仓库配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,

    pub location: WarehouseLocation,

    /// BigQuery OAuth access token
    pub access_token: String,

    /// BigQuery REST API基地址
    pub api_base_url: String,

    /// fixture后端的数据文件（JSON数组）
    pub fixture_path: Option<PathBuf>,

    /// 允许作为分组维度的列名白名单
    pub segment_dimensions: Vec<String>,

    /// 是否向Research阶段开放自然语言查询（NL2SQL）工具
    pub enable_nl2sql: bool,

    /// 单次查询返回的最大行数
    pub max_rows: usize,

    /// 重试次数
    pub retry_attempts: u32,

    /// 首次重试间隔（毫秒），之后指数递增
    pub retry_delay_ms: u64,

    /// 单次查询超时时间（秒）
    pub timeout_seconds: u64,
}

/// Agent对话循环配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    /// 单个阶段允许的最大模型调用轮数
    pub max_turns: usize,
}

/// 流水线配置
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// 整条流水线的截止时间（秒），为空表示不限制
    pub deadline_seconds: Option<u64>,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_language: TargetLanguage::default(),
            output_path: None,
            verbose: false,
            kpi: None,
            llm: LLMConfig::default(),
            warehouse: WarehouseConfig::default(),
            runner: RunnerConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("KPI_ENGINE_LLM_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api.openai.com/v1"),
            model_efficient: String::from("gpt-4o-mini"),
            model_powerful: String::from("gpt-4o"),
            max_tokens: 8192,
            temperature: 0.1,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            timeout_seconds: 120,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            location: WarehouseLocation::default(),
            access_token: std::env::var("KPI_ENGINE_BQ_ACCESS_TOKEN").unwrap_or_default(),
            api_base_url: String::from("https://bigquery.googleapis.com/bigquery/v2"),
            fixture_path: None,
            segment_dimensions: vec![
                "campaign_id".to_string(),
                "device".to_string(),
                "region".to_string(),
            ],
            enable_nl2sql: false,
            max_rows: 500,
            retry_attempts: 3,
            retry_delay_ms: 500,
            timeout_seconds: 60,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_turns: 8 }
    }
}
