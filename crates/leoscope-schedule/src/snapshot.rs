//! Shared environment snapshot fed by the monitors.
//!
//! Monitors write typed observations under dotted keys; the trigger
//! evaluator reads a consistent point-in-time view just before a firing.
//! Writes are last-writer-wins per key.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A single observed value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    /// Numeric observation (elevations, latencies, temperatures).
    Number(f64),
    /// Textual observation (weather condition, terminal state).
    Text(String),
}

impl From<f64> for SnapshotValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SnapshotValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SnapshotValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Live key/value snapshot shared between monitors and the evaluator.
///
/// Cloning is cheap; all clones observe the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    inner: Arc<RwLock<HashMap<String, SnapshotValue>>>,
}

impl EnvSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a single key. Overwrites any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<SnapshotValue>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.into(), value.into());
    }

    /// Write a batch of keys atomically with respect to readers.
    pub fn set_many<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SnapshotValue>,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            guard.insert(key.into(), value.into());
        }
    }

    /// Consistent point-in-time view of every key.
    #[must_use]
    pub fn view(&self) -> SnapshotView {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        SnapshotView(guard.clone())
    }
}

/// An immutable point-in-time copy of the snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotView(HashMap<String, SnapshotValue>);

impl SnapshotView {
    /// An empty view, for evaluation without monitors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SnapshotValue> {
        self.0.get(key)
    }

    /// Number of keys in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the view holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<SnapshotValue>> FromIterator<(K, V)> for SnapshotView {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins() {
        let snapshot = EnvSnapshot::new();
        snapshot.set("satellite_elevation", 12.0);
        snapshot.set("satellite_elevation", 45.0);

        let view = snapshot.view();
        assert_eq!(
            view.get("satellite_elevation"),
            Some(&SnapshotValue::Number(45.0))
        );
    }

    #[test]
    fn view_is_point_in_time() {
        let snapshot = EnvSnapshot::new();
        snapshot.set("weather.condition", "clear");

        let view = snapshot.view();
        snapshot.set("weather.condition", "rain");

        assert_eq!(
            view.get("weather.condition"),
            Some(&SnapshotValue::Text("clear".to_owned()))
        );
        assert_eq!(
            snapshot.view().get("weather.condition"),
            Some(&SnapshotValue::Text("rain".to_owned()))
        );
    }

    #[test]
    fn clones_share_state() {
        let snapshot = EnvSnapshot::new();
        let writer = snapshot.clone();
        writer.set("terminal.pop_ping_ms", 38.5);
        assert_eq!(
            snapshot.view().get("terminal.pop_ping_ms"),
            Some(&SnapshotValue::Number(38.5))
        );
    }
}
