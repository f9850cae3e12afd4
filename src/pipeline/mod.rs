//! Diligence pipeline: data model, orchestration and aggregation

pub mod aggregator;
pub mod orchestrator;
pub mod types;

pub use aggregator::aggregate;
pub use orchestrator::Orchestrator;
pub use types::*;
