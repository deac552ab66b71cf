//! The LEOScope coordinator.
//!
//! A single logical writer over the metadata store. Exposes the HTTP API
//! for admission, queries, run bookkeeping, task rendezvous, and the
//! scavenger toggle. Admissions touching the same node are serialised
//! through a per-node critical section so the first persisted job wins.

pub mod admission;
pub mod api;
pub mod auth;
pub mod config;
mod error;

pub use admission::Admission;
pub use api::AppState;
pub use auth::{AuthLayer, AuthState, CallerIdentity};
pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
