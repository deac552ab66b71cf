//! Five-field cron expressions.
//!
//! Wraps [`cron::Schedule`], which expects a seconds field, behind the
//! standard `minute hour day-of-month month day-of-week` form used on the
//! wire. Firings always land on whole-minute boundaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use crate::error::{Result, ScheduleError};

/// A parsed five-field cron expression.
///
/// Formatting returns the original expression, so
/// `CronExpr::parse(expr)?.to_string() == expr` for any canonical input.
#[derive(Debug, Clone)]
pub struct CronExpr {
    expr: String,
    inner: Schedule,
}

impl CronExpr {
    /// Parse a five-field cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::InvalidCron {
                expr: expr.to_owned(),
                reason: format!("expected 5 fields, got {fields}"),
            });
        }
        // Pin the seconds field so firings sit on minute boundaries.
        let inner =
            Schedule::from_str(&format!("0 {expr}")).map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expr: expr.to_owned(),
            inner,
        })
    }

    /// The original expression string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// First firing at or after `from`.
    #[must_use]
    pub fn first_at_or_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // `after` is exclusive; firings are on second boundaries, so backing
        // off one second makes `from` itself eligible.
        self.inner.after(&(from - Duration::seconds(1))).next()
    }

    /// Iterator over firings at or after `from`, unbounded.
    pub fn firings_from(&self, from: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.inner.after(&(from - Duration::seconds(1)))
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}
