pub mod cli;
pub mod config;
pub mod error;
pub mod generator;
pub mod i18n;
pub mod llm;
pub mod types;
pub mod utils;
pub mod warehouse;

// Re-export commonly used types
pub use config::Config;
pub use generator::orchestrator::{Orchestrator, PipelineOutput};
pub use generator::workflow::{launch, run_pipeline};
pub use types::{KpiTarget, WarehouseLocation};
