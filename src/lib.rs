//! taskforge: parallel task-orchestration engine.
//!
//! Distributes heterogeneous ingestion/processing work across a pool of
//! typed workers, applies configurable load-balancing policies, retries
//! failed work, and adaptively resizes the pool under load.

// Core modules
pub mod cli;
pub mod engine;
pub mod feeder;
pub mod metrics;
pub mod scheduler;
pub mod workers;

// Re-export the engine surface most callers need
pub use engine::{EngineConfig, EngineError, EngineEvent, Orchestrator, SystemStatus};
pub use scheduler::{BalancingStrategy, TaskRequest, TaskSource, WorkerKind};
pub use workers::{Executor, SimulatedExecutor};
