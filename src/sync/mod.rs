//! The reconciliation engine and its background scheduler.

mod cursor;
mod engine;
mod scheduler;

pub use engine::{EngineConfig, ReconcilingTransfer, SyncEngine, SyncOutcome};
pub use scheduler::Scheduler;
