use crate::error::{IndexingError, SearchError};
use crate::models::{
    CreateOutcome, FileRecord, IndexSchema, IndexedDocument, RunStatus, SearchRequest,
    StatusUpdate, UploadAck, WriteOutcome,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, reference: &str, bytes: Vec<u8>) -> Result<(), IndexingError>;

    /// Fails with `IndexingError::NotFound` when the reference is absent.
    async fn download(&self, reference: &str) -> Result<Vec<u8>, IndexingError>;

    async fn delete(&self, reference: &str) -> Result<(), IndexingError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedTable {
    pub row_count: usize,
    pub column_count: usize,
    pub cells: BTreeMap<(usize, usize), String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedPage {
    pub paragraphs: Vec<String>,
    pub tables: Vec<AnalyzedTable>,
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, bytes: &[u8], filename: &str)
        -> Result<Vec<AnalyzedPage>, IndexingError>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexingError>;
}

#[async_trait]
pub trait SearchIndexService: Send + Sync {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, SearchError>;

    /// Creating an index that already exists reports `CreateOutcome::AlreadyExists`.
    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome, SearchError>;

    async fn upload_documents(
        &self,
        documents: &[IndexedDocument],
    ) -> Result<Vec<UploadAck>, SearchError>;

    async fn delete_documents(&self, ids: &[String]) -> Result<(), SearchError>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<IndexedDocument>, SearchError>;
}

#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn insert(&self, record: FileRecord) -> Result<(), IndexingError>;

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, IndexingError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, IndexingError>;

    /// Resets the record to pending and returns its new generation.
    async fn begin_run(&self, file_id: &str) -> Result<u64, IndexingError>;

    /// Attaches `run_id` unless a newer generation has started meanwhile.
    async fn set_run_id(
        &self,
        file_id: &str,
        generation: u64,
        run_id: &str,
    ) -> Result<WriteOutcome, IndexingError>;

    /// Compare-and-set on `generation` and the stored status. The write is
    /// `Stale` when the generation moved on or the stored status cannot
    /// advance to `update.status`; repeating the stored status is a no-op.
    async fn update_status(
        &self,
        file_id: &str,
        generation: u64,
        update: &StatusUpdate,
    ) -> Result<WriteOutcome, IndexingError>;

    async fn delete(&self, file_id: &str) -> Result<bool, IndexingError>;
}

/// Handle given to a running workflow; every step goes through it so the
/// engine can retry and record progress per activity.
#[async_trait]
pub trait ActivityContext: Send + Sync {
    fn run_id(&self) -> &str;

    async fn call_activity(&self, name: &str, args: Value) -> Result<Value, IndexingError>;
}

impl<'a> dyn ActivityContext + 'a {
    pub async fn call<A, R>(&self, name: &str, args: &A) -> Result<R, IndexingError>
    where
        A: Serialize + ?Sized + Sync,
        R: serde::de::DeserializeOwned,
    {
        let output = self.call_activity(name, serde_json::to_value(args)?).await?;
        Ok(serde_json::from_value(output)?)
    }
}

#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError>;
}

#[async_trait]
pub trait Workflow: Send + Sync {
    async fn run(&self, ctx: &dyn ActivityContext, args: Value) -> Result<Value, IndexingError>;
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    fn register_activity(&self, name: &str, activity: Arc<dyn Activity>);

    fn register_workflow(&self, name: &str, workflow: Arc<dyn Workflow>);

    async fn invoke_workflow(&self, name: &str, args: Value) -> Result<String, IndexingError>;

    async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, IndexingError>;
}
