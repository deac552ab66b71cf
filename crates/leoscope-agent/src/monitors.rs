//! Environmental monitors.
//!
//! Each monitor samples an external source on its own cadence and writes
//! typed observations into the shared snapshot. Monitors never trigger
//! transitions themselves; a failing sample is logged and the previous
//! values stay in place, so the evaluator always sees the last known
//! state. Monitor tasks are isolated from the scheduler loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use leoscope_schedule::{EnvSnapshot, SnapshotValue};

use crate::error::{AgentError, Result};

/// A periodic producer of snapshot observations.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Monitor name, used for logging.
    fn name(&self) -> &str;

    /// Sampling cadence.
    fn interval(&self) -> Duration;

    /// Take one sample, returning the keys to write.
    async fn sample(&self) -> Result<Vec<(String, SnapshotValue)>>;
}

/// Run a monitor until shutdown, feeding the snapshot.
pub fn spawn_monitor(
    monitor: Arc<dyn Monitor>,
    snapshot: EnvSnapshot,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(monitor.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    match monitor.sample().await {
                        Ok(entries) => {
                            debug!(monitor = monitor.name(), keys = entries.len(), "sampled");
                            snapshot.set_many(entries);
                        }
                        Err(err) => {
                            // Last known values stay in place.
                            warn!(monitor = monitor.name(), error = %err, "sample failed");
                        }
                    }
                }
            }
        }
    })
}

/// Monitor that fetches a JSON document over HTTP and flattens its
/// numeric and string fields into prefixed snapshot keys.
///
/// Nested objects become dotted paths; booleans are written as 0/1 so
/// triggers can compare them numerically.
pub struct HttpJsonMonitor {
    name: String,
    url: String,
    prefix: String,
    interval: Duration,
    client: reqwest::Client,
}

impl HttpJsonMonitor {
    /// Create a monitor.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        prefix: impl Into<String>,
        interval: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AgentError::Config(format!("monitor client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            prefix: prefix.into(),
            interval,
            client,
        })
    }
}

#[async_trait]
impl Monitor for HttpJsonMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn sample(&self) -> Result<Vec<(String, SnapshotValue)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AgentError::Runtime(format!("{}: {e}", self.name)))?;
        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Runtime(format!("{}: {e}", self.name)))?;

        let mut entries = Vec::new();
        flatten(&self.prefix, &document, &mut entries);
        Ok(entries)
    }
}

/// Flatten a JSON document into prefixed snapshot entries.
pub fn flatten(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, SnapshotValue)>) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push((prefix.to_owned(), SnapshotValue::Number(f)));
            }
        }
        serde_json::Value::String(s) => {
            out.push((prefix.to_owned(), SnapshotValue::Text(s.clone())));
        }
        serde_json::Value::Bool(b) => {
            out.push((prefix.to_owned(), SnapshotValue::Number(f64::from(u8::from(*b)))));
        }
        serde_json::Value::Object(map) => {
            for (key, sub) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else if prefix.ends_with('.') || prefix.ends_with('_') {
                    format!("{prefix}{key}")
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, sub, out);
            }
        }
        // Arrays and nulls carry no comparable value.
        serde_json::Value::Array(_) | serde_json::Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(prefix: &str, value: serde_json::Value) -> Vec<(String, SnapshotValue)> {
        let mut out = Vec::new();
        flatten(prefix, &value, &mut out);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn flattens_scalars_with_prefix() {
        let entries = flat("satellite_", json!({"elevation": 42.5}));
        assert_eq!(
            entries,
            vec![(
                "satellite_elevation".to_owned(),
                SnapshotValue::Number(42.5)
            )]
        );
    }

    #[test]
    fn flattens_nested_objects_to_dotted_paths() {
        let entries = flat(
            "weather",
            json!({"condition": "clear", "wind": {"speed": 3.2}}),
        );
        assert_eq!(
            entries,
            vec![
                (
                    "weather.condition".to_owned(),
                    SnapshotValue::Text("clear".to_owned())
                ),
                ("weather.wind.speed".to_owned(), SnapshotValue::Number(3.2)),
            ]
        );
    }

    #[test]
    fn booleans_become_numbers() {
        let entries = flat("terminal", json!({"obstructed": true}));
        assert_eq!(
            entries,
            vec![("terminal.obstructed".to_owned(), SnapshotValue::Number(1.0))]
        );
    }

    #[test]
    fn arrays_and_nulls_are_skipped() {
        let entries = flat("x", json!({"list": [1, 2], "missing": null, "ok": 1}));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "x.ok");
    }

    struct FlakyMonitor {
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Monitor for FlakyMonitor {
        fn name(&self) -> &str {
            "flaky"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn sample(&self) -> Result<Vec<(String, SnapshotValue)>> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                Err(AgentError::Runtime("source down".to_owned()))
            } else {
                Ok(vec![(
                    "satellite_elevation".to_owned(),
                    SnapshotValue::Number(31.0),
                )])
            }
        }
    }

    #[tokio::test]
    async fn failing_monitor_leaves_last_value() {
        let snapshot = EnvSnapshot::new();
        let monitor = Arc::new(FlakyMonitor {
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_monitor(monitor.clone(), snapshot.clone(), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            snapshot.view().get("satellite_elevation"),
            Some(&SnapshotValue::Number(31.0))
        );

        // Source goes down; the stale value survives.
        monitor.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            snapshot.view().get("satellite_elevation"),
            Some(&SnapshotValue::Number(31.0))
        );

        shutdown.cancel();
        let _ = handle.await;
    }
}
