pub mod orchestrator;
pub mod sink;

pub use orchestrator::SettlementOrchestrator;
pub use sink::{HttpResultSink, PickSubmission, ResultSink, SettlementSubmission};
