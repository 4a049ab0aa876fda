//! The ReAct reasoning loop and the auto-investigation orchestrator.

pub mod investigator;
pub mod memory;
pub mod prompt;
pub mod react;

#[cfg(test)]
mod tests;

pub use investigator::{InvestigationRequest, InvestigationStatus, Investigator};
pub use memory::ConversationMemory;
pub use react::{EmitMode, ReactLoop, RunParams, RunResult, DEFAULT_MAX_STEPS};
