pub mod kpi;

pub use kpi::{KpiTarget, WarehouseLocation};
