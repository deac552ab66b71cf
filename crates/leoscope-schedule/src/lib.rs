//! Schedule algebra and trigger evaluation.
//!
//! This crate owns the admission mathematics: enumerating the firing
//! instants of a job inside its validity window, detecting pairwise
//! occupancy overlap, and searching for the nearest free slot when a
//! one-shot job has to move. It also hosts the trigger expression language
//! evaluated on nodes just before each firing, together with the shared
//! environment snapshot the monitors write into.

mod cron_expr;
mod error;
mod occupancy;
mod snapshot;
mod trigger;

pub use cron_expr::CronExpr;
pub use error::{Result, ScheduleError};
pub use occupancy::{find_conflict, find_nearest_slot, validate_job, Conflict, Interval};
pub use snapshot::{EnvSnapshot, SnapshotValue, SnapshotView};
pub use trigger::{Comparison, Literal, TriggerExpr};
