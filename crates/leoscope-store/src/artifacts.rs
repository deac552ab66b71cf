//! Artifact storage over `object_store`.
//!
//! Each run uploads exactly one archive to a path derived from
//! `(node_id, job_id, date(start_ts), run_id)`, so collisions are
//! impossible and retries are idempotent.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::Deserialize;
use tracing::{debug, info};

use leoscope_proto::{JobId, NodeId, RunId};

use crate::error::{Result, StoreError};

/// Configuration for artifact storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage type: "local" or "memory".
    pub storage_type: String,
    /// Base directory for the local backend.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "local".to_owned(),
            path: "/var/lib/leoscope/artifacts".to_owned(),
        }
    }
}

/// Blob store for run archives.
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    /// Create an artifact store from configuration.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = create_object_store(config)?;
        Ok(Self { store })
    }

    /// Create an artifact store over a pre-built object store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Deterministic blob path for a run archive.
    #[must_use]
    pub fn run_path(
        node_id: &NodeId,
        job_id: &JobId,
        start_ts: DateTime<Utc>,
        run_id: &RunId,
    ) -> String {
        format!(
            "artifacts/{}/{}/{:04}/{:02}/{:02}/{}.tar",
            node_id,
            job_id,
            start_ts.year(),
            start_ts.month(),
            start_ts.day(),
            run_id
        )
    }

    /// Upload a run archive. Returns the blob path.
    pub async fn upload(
        &self,
        node_id: &NodeId,
        job_id: &JobId,
        start_ts: DateTime<Utc>,
        run_id: &RunId,
        data: Bytes,
    ) -> Result<String> {
        let path = Self::run_path(node_id, job_id, start_ts, run_id);
        let object_path = ObjectPath::from(path.as_str());

        debug!(path = %path, size = data.len(), "uploading run archive");
        self.store
            .put(&object_path, data.into())
            .await
            .map_err(|e| StoreError::Artifact(format!("failed to upload archive: {e}")))?;

        info!(path = %path, "run archive uploaded");
        Ok(path)
    }

    /// Download an archive by its blob path.
    pub async fn download(&self, path: &str) -> Result<Bytes> {
        let object_path = ObjectPath::from(path);
        let result = self
            .store
            .get(&object_path)
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => {
                    StoreError::NotFound(format!("artifact {path}"))
                }
                other => StoreError::Artifact(format!("failed to download archive: {other}")),
            })?;

        result
            .bytes()
            .await
            .map_err(|e| StoreError::Artifact(format!("failed to read archive: {e}")))
    }

    /// Check whether an archive exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let object_path = ObjectPath::from(path);
        match self.store.head(&object_path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::Artifact(format!(
                "failed to check archive: {e}"
            ))),
        }
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore").finish_non_exhaustive()
    }
}

fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage_type.as_str() {
        "local" => {
            std::fs::create_dir_all(&config.path)
                .map_err(|e| StoreError::Artifact(format!("failed to create base dir: {e}")))?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(&config.path)
                .map_err(|e| StoreError::Artifact(format!("failed to create local store: {e}")))?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(object_store::memory::InMemory::new())),
        other => Err(StoreError::Artifact(format!(
            "unsupported storage type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn memory_store() -> ArtifactStore {
        ArtifactStore::new(&StorageConfig {
            storage_type: "memory".to_owned(),
            path: String::new(),
        })
        .unwrap()
    }

    #[test]
    fn run_path_layout() {
        let start = Utc.with_ymd_and_hms(2024, 3, 7, 9, 30, 0).unwrap();
        let path = ArtifactStore::run_path(
            &NodeId::new("n1"),
            &JobId::new("jobA"),
            start,
            &RunId::new("r-42"),
        );
        assert_eq!(path, "artifacts/n1/jobA/2024/03/07/r-42.tar");
    }

    #[tokio::test]
    async fn upload_then_download() {
        let store = memory_store();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let path = store
            .upload(
                &NodeId::new("n1"),
                &JobId::new("a"),
                start,
                &RunId::new("r1"),
                Bytes::from_static(b"archive-bytes"),
            )
            .await
            .unwrap();

        assert!(store.exists(&path).await.unwrap());
        let data = store.download(&path).await.unwrap();
        assert_eq!(&data[..], b"archive-bytes");
    }

    #[tokio::test]
    async fn missing_archive_is_not_found() {
        let store = memory_store();
        assert!(!store.exists("artifacts/nope.tar").await.unwrap());
        assert!(matches!(
            store.download("artifacts/nope.tar").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
