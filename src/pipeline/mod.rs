//! One job, end to end: Tree Builder, then Parallel Cache Builder, then Consolidator.

pub mod context;
pub mod orchestrator;

pub use context::JobContext;
pub use orchestrator::{JobReport, PresentationBuilder};
