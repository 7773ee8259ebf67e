use crate::error::IndexingError;
use crate::models::{FileRecord, StatusUpdate, WriteOutcome};
use crate::stores::table::RecordTable;
use crate::traits::{BlobStore, FileRecordStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Blobs stored as plain files below `root`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, IndexingError> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));

        if reference.trim().is_empty() || escapes {
            return Err(IndexingError::Validation(format!(
                "invalid blob reference: {reference}"
            )));
        }

        Ok(self.root.join(relative))
    }
}

fn missing_blob(error: std::io::Error, reference: &str) -> IndexingError {
    if error.kind() == ErrorKind::NotFound {
        IndexingError::not_found("blob", reference)
    } else {
        IndexingError::Io(error)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, reference: &str, bytes: Vec<u8>) -> Result<(), IndexingError> {
        let path = self.resolve(reference)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "wrote blob");
        Ok(())
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, IndexingError> {
        let path = self.resolve(reference)?;
        fs::read(&path)
            .await
            .map_err(|error| missing_blob(error, reference))
    }

    async fn delete(&self, reference: &str) -> Result<(), IndexingError> {
        let path = self.resolve(reference)?;
        fs::remove_file(&path)
            .await
            .map_err(|error| missing_blob(error, reference))
    }
}

/// File records kept in one JSON document. Every mutation rewrites the
/// document through a temp file and a rename, so a crash never leaves a
/// half-written file behind.
pub struct JsonFileRecordStore {
    path: PathBuf,
    table: Mutex<RecordTable>,
}

impl JsonFileRecordStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexingError> {
        let path = path.into();
        let table = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(error) if error.kind() == ErrorKind::NotFound => RecordTable::default(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    async fn persist(&self, table: &RecordTable) -> Result<(), IndexingError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(table)?).await?;
        fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    /// Applies `change` to a copy, persists it, then publishes it in memory.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut RecordTable) -> Result<T, IndexingError> + Send,
    ) -> Result<T, IndexingError> {
        let mut guard = self.table.lock().await;
        let mut next = guard.clone();
        let outcome = change(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(outcome)
    }
}

#[async_trait]
impl FileRecordStore for JsonFileRecordStore {
    async fn insert(&self, record: FileRecord) -> Result<(), IndexingError> {
        self.mutate(|table| table.insert(record)).await
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, IndexingError> {
        Ok(self.table.lock().await.get(file_id))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, IndexingError> {
        Ok(self.table.lock().await.list_by_owner(owner_id))
    }

    async fn begin_run(&self, file_id: &str) -> Result<u64, IndexingError> {
        self.mutate(|table| table.begin_run(file_id)).await
    }

    async fn set_run_id(
        &self,
        file_id: &str,
        generation: u64,
        run_id: &str,
    ) -> Result<WriteOutcome, IndexingError> {
        self.mutate(|table| table.set_run_id(file_id, generation, run_id))
            .await
    }

    async fn update_status(
        &self,
        file_id: &str,
        generation: u64,
        update: &StatusUpdate,
    ) -> Result<WriteOutcome, IndexingError> {
        self.mutate(|table| table.update_status(file_id, generation, update))
            .await
    }

    async fn delete(&self, file_id: &str) -> Result<bool, IndexingError> {
        self.mutate(|table| Ok(table.delete(file_id))).await
    }
}
