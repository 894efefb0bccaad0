//! Workers: typed execution slots, the pool that owns them, and the
//! pluggable execution seam.
//!
//! - **Worker**: one slot with a status and rolling performance metrics
//! - **WorkerPool**: creates, removes and queries workers
//! - **Executor**: trait the engine calls to actually process a task;
//!   [`SimulatedExecutor`] is the bundled timing-model implementation

pub mod executor;
pub mod pool;
pub mod worker;

pub use executor::{ExecuteError, Executor, SimulatedExecutor, WorkerProfile};
pub use pool::{PoolError, WorkerPool};
pub use worker::{Worker, WorkerMetrics, WorkerStatus};

// The kind enum lives with the task model; re-exported here because worker
// construction and pool queries are keyed on it.
pub use crate::scheduler::task::WorkerKind;
