//! The engine: configuration, event stream, orchestrator and scaler.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskforge::engine::{EngineConfig, Orchestrator};
//! use taskforge::workers::SimulatedExecutor;
//!
//! let config = EngineConfig::default();
//! let executor = Arc::new(SimulatedExecutor::default());
//! let mut engine = Orchestrator::new(config, executor)?;
//!
//! engine.start().await?;
//! let task_id = engine.add_task(request)?;
//! // ... observe engine.subscribe() / poll engine.status() ...
//! engine.shutdown().await?;
//! ```

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod scaler;

pub use config::{ConfigError, EngineConfig, ErrorRecovery};
pub use events::{EngineEvent, EventBus};
pub use orchestrator::{EngineError, EngineHandle, Orchestrator, SystemStatus};
pub use scaler::{AdaptiveScaler, ScaleOutcome};
