pub mod insights;
pub mod planning;
pub mod research;
pub mod types;

pub use insights::InsightsAgent;
pub use planning::PlanningAgent;
pub use research::ResearchAgent;
