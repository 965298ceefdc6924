//! Orchestration loop
//!
//! Drives one user turn through completion rounds and tool execution until
//! the model produces a plain answer.

mod orchestrator;
mod state;

pub use orchestrator::OrchestrationLoop;
pub use state::LoopState;
