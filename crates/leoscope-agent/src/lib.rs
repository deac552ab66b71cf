//! The per-node agent.
//!
//! Polls the coordinator for admitted jobs, materialises them into local
//! recurring and one-shot timers, runs each firing through the executor
//! inside an isolated container, feeds trigger evaluation from the
//! environmental monitors, and reacts to scavenger mode by killing
//! overhead containers on sight.

pub mod config;
pub mod dispatch;
mod error;
pub mod executor;
pub mod monitors;
pub mod runtime;
pub mod scheduler_loop;

pub use config::AgentConfig;
pub use dispatch::LocalDispatcher;
pub use error::{AgentError, Result};
pub use executor::{ExecutionRegistry, Executor};
pub use monitors::{spawn_monitor, HttpJsonMonitor, Monitor};
pub use runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary, DockerCli, FakeRuntime,
};
pub use scheduler_loop::NodeScheduler;
