pub mod agent_runner;
pub mod artifact_log;
pub mod context;
pub mod orchestrator;
pub mod outlet;
pub mod stage_agent;
pub mod stages;
pub mod workflow;
