use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::generator::artifact_log::ArtifactLog;
use crate::generator::context::PipelineContext;
use crate::generator::orchestrator::PipelineOutput;

pub mod summary_generator;

pub use summary_generator::SummaryGenerator;

/// 最终报告文件名
pub const REPORT_FILE: &str = "kpi_report.json";
/// 审计轨迹文件名
pub const ARTIFACT_LOG_FILE: &str = "artifact_log.json";

/// 保存报告与产物日志，未配置输出目录时什么也不做
pub async fn save(context: &PipelineContext, output: &PipelineOutput) -> Result<()> {
    let Some(output_dir) = &context.config.output_path else {
        return Ok(());
    };
    let log = context.artifact_log_snapshot().await;
    DiskOutlet::new(output_dir).save(output, &log)
}

pub struct DiskOutlet<'a> {
    output_dir: &'a Path,
}

impl<'a> DiskOutlet<'a> {
    pub fn new(output_dir: &'a Path) -> Self {
        Self { output_dir }
    }

    pub fn save(&self, output: &PipelineOutput, log: &ArtifactLog) -> Result<()> {
        tracing::info!("🖊️ 报告存储中...");
        fs::create_dir_all(self.output_dir).with_context(|| {
            format!("Failed to create output directory: {}", self.output_dir.display())
        })?;

        self.write(REPORT_FILE, &output.to_json()?)?;
        self.write(ARTIFACT_LOG_FILE, &log.to_json()?)?;

        if let PipelineOutput::Completed(report) = output {
            match SummaryGenerator::from_report(report) {
                Ok(summary) => tracing::info!("\n{}", summary.render()),
                Err(e) => tracing::warn!("⚠️ 无法生成策略摘要: {}", e),
            }
        }

        tracing::info!("💾 报告保存完成，输出目录: {}", self.output_dir.display());
        Ok(())
    }

    fn write(&self, file_name: &str, content: &str) -> Result<()> {
        let path = self.output_dir.join(file_name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("💾 已保存: {}", path.display());
        Ok(())
    }
}
