use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::embed_chunks;
use crate::error::IndexingError;
use crate::extractor::extract_content;
use crate::models::{FileStatus, IndexedDocument, IndexingOptions, StatusUpdate, WriteOutcome};
use crate::schema::{document_index_schema, ensure_index};
use crate::store::store_documents;
use crate::traits::{
    Activity, ActivityContext, BlobStore, DocumentAnalyzer, EmbeddingService, FileRecordStore,
    SearchIndexService, Workflow, WorkflowEngine,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const INDEX_FILE_WORKFLOW: &str = "index_file_v1";
pub const ENSURE_INDEX_ACTIVITY: &str = "ensure_search_index_v1";
pub const UPDATE_STATUS_ACTIVITY: &str = "update_indexing_status_v1";
pub const EXTRACT_ACTIVITY: &str = "ocr_file_v1";
pub const CHUNK_ACTIVITY: &str = "chunk_file_v1";
pub const EMBED_ACTIVITY: &str = "embed_chunks_v1";
pub const STORE_ACTIVITY: &str = "store_embeddings_v1";

/// Collaborators shared by every indexing activity.
#[derive(Clone)]
pub struct IndexingContext {
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub search: Arc<dyn SearchIndexService>,
    pub records: Arc<dyn FileRecordStore>,
    pub options: IndexingOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFileArgs {
    pub file_id: String,
    /// Fencing token of the run; status writes from older generations are dropped.
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusArgs {
    pub file_id: String,
    pub generation: u64,
    #[serde(flatten)]
    pub update: StatusUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractArgs {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkArgs {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedArgs {
    pub file_id: String,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreArgs {
    pub documents: Vec<IndexedDocument>,
}

fn decode<T: DeserializeOwned>(activity: &str, args: Value) -> Result<T, IndexingError> {
    serde_json::from_value(args).map_err(|error| {
        IndexingError::Validation(format!("invalid input for {activity}: {error}"))
    })
}

fn encode<T: Serialize>(output: T) -> Result<Value, IndexingError> {
    Ok(serde_json::to_value(output)?)
}

fn logged<T>(activity: &str, result: Result<T, IndexingError>) -> Result<T, IndexingError> {
    if let Err(failure) = &result {
        error!(activity, error = %failure, "activity failed");
    }
    result
}

pub struct EnsureIndexActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for EnsureIndexActivity {
    async fn execute(&self, _args: Value) -> Result<Value, IndexingError> {
        let schema = document_index_schema(&self.context.options);
        encode(ensure_index(self.context.search.as_ref(), &schema).await)
    }
}

/// Writes a status if the run still owns the record. Returns whether the
/// write was applied.
pub struct UpdateStatusActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for UpdateStatusActivity {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
        let args: StatusArgs = decode(UPDATE_STATUS_ACTIVITY, args)?;
        let outcome = logged(
            UPDATE_STATUS_ACTIVITY,
            self.context
                .records
                .update_status(&args.file_id, args.generation, &args.update)
                .await,
        )?;

        match outcome {
            WriteOutcome::Applied => info!(
                file_id = %args.file_id,
                status = %args.update.status,
                "updated indexing status"
            ),
            WriteOutcome::Stale => warn!(
                file_id = %args.file_id,
                generation = args.generation,
                status = %args.update.status,
                "dropped status write, the record moved on"
            ),
        }

        encode(outcome == WriteOutcome::Applied)
    }
}

pub struct ExtractActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for ExtractActivity {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
        let args: ExtractArgs = decode(EXTRACT_ACTIVITY, args)?;
        let content = logged(
            EXTRACT_ACTIVITY,
            extract_content(
                self.context.records.as_ref(),
                self.context.blobs.as_ref(),
                self.context.analyzer.as_ref(),
                &args.file_id,
            )
            .await,
        )?;
        encode(content)
    }
}

pub struct ChunkActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for ChunkActivity {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
        let args: ChunkArgs = decode(CHUNK_ACTIVITY, args)?;
        let config = ChunkingConfig::from(&self.context.options);
        logged(CHUNK_ACTIVITY, config.validate().map_err(IndexingError::from))?;

        let chunks = chunk_text(&args.content, &config);
        info!(count = chunks.len(), "split content into chunks");
        encode(chunks)
    }
}

pub struct EmbedActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for EmbedActivity {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
        let args: EmbedArgs = decode(EMBED_ACTIVITY, args)?;
        let documents = logged(
            EMBED_ACTIVITY,
            embed_chunks(
                self.context.embedder.as_ref(),
                self.context.records.as_ref(),
                &args.chunks,
                &args.file_id,
            )
            .await,
        )?;
        encode(documents)
    }
}

pub struct StoreActivity {
    context: Arc<IndexingContext>,
}

#[async_trait]
impl Activity for StoreActivity {
    async fn execute(&self, args: Value) -> Result<Value, IndexingError> {
        let args: StoreArgs = decode(STORE_ACTIVITY, args)?;
        let stored = logged(
            STORE_ACTIVITY,
            store_documents(self.context.search.as_ref(), &args.documents).await,
        )?;
        encode(stored)
    }
}

/// Runs ensure-index, extraction, chunking, embedding and storage in order and
/// owns the file's status for its generation. Returns `true` only when every
/// chunk was stored.
pub struct IndexingWorkflow;

impl IndexingWorkflow {
    async fn set_status(
        ctx: &dyn ActivityContext,
        args: &IndexFileArgs,
        update: StatusUpdate,
    ) -> Result<bool, IndexingError> {
        ctx.call(
            UPDATE_STATUS_ACTIVITY,
            &StatusArgs {
                file_id: args.file_id.clone(),
                generation: args.generation,
                update,
            },
        )
        .await
    }

    async fn index(ctx: &dyn ActivityContext, args: &IndexFileArgs) -> Result<bool, IndexingError> {
        let content: String = ctx
            .call(
                EXTRACT_ACTIVITY,
                &ExtractArgs {
                    file_id: args.file_id.clone(),
                },
            )
            .await?;

        let chunks: Vec<String> = ctx.call(CHUNK_ACTIVITY, &ChunkArgs { content }).await?;

        let documents: Vec<IndexedDocument> = ctx
            .call(
                EMBED_ACTIVITY,
                &EmbedArgs {
                    file_id: args.file_id.clone(),
                    chunks,
                },
            )
            .await?;

        ctx.call(STORE_ACTIVITY, &StoreArgs { documents }).await
    }
}

#[async_trait]
impl Workflow for IndexingWorkflow {
    async fn run(&self, ctx: &dyn ActivityContext, args: Value) -> Result<Value, IndexingError> {
        let args: IndexFileArgs = decode(INDEX_FILE_WORKFLOW, args)?;
        info!(file_id = %args.file_id, run_id = ctx.run_id(), "indexing workflow started");

        let index_ready: bool = ctx.call(ENSURE_INDEX_ACTIVITY, &Value::Null).await?;
        if !index_ready {
            Self::set_status(ctx, &args, StatusUpdate::failed("failed to create search index"))
                .await?;
            return encode(false);
        }

        if !Self::set_status(ctx, &args, StatusUpdate::new(FileStatus::InProgress)).await? {
            warn!(file_id = %args.file_id, "run superseded before indexing began");
            return encode(false);
        }

        let (update, indexed) = match Self::index(ctx, &args).await {
            Ok(true) => (StatusUpdate::new(FileStatus::Completed), true),
            Ok(false) => (StatusUpdate::failed("failed to store embeddings"), false),
            Err(failure) => {
                error!(file_id = %args.file_id, error = %failure, "indexing workflow failed");
                (
                    StatusUpdate::failed(format!("indexing workflow failed: {failure}")),
                    false,
                )
            }
        };

        Self::set_status(ctx, &args, update).await?;
        info!(file_id = %args.file_id, indexed, "indexing workflow finished");
        encode(indexed)
    }
}

/// Registers the indexing workflow and its activities under their versioned names.
pub fn register(engine: &dyn WorkflowEngine, context: Arc<IndexingContext>) {
    engine.register_activity(
        ENSURE_INDEX_ACTIVITY,
        Arc::new(EnsureIndexActivity {
            context: Arc::clone(&context),
        }),
    );
    engine.register_activity(
        UPDATE_STATUS_ACTIVITY,
        Arc::new(UpdateStatusActivity {
            context: Arc::clone(&context),
        }),
    );
    engine.register_activity(
        EXTRACT_ACTIVITY,
        Arc::new(ExtractActivity {
            context: Arc::clone(&context),
        }),
    );
    engine.register_activity(
        CHUNK_ACTIVITY,
        Arc::new(ChunkActivity {
            context: Arc::clone(&context),
        }),
    );
    engine.register_activity(
        EMBED_ACTIVITY,
        Arc::new(EmbedActivity {
            context: Arc::clone(&context),
        }),
    );
    engine.register_activity(STORE_ACTIVITY, Arc::new(StoreActivity { context }));
    engine.register_workflow(INDEX_FILE_WORKFLOW, Arc::new(IndexingWorkflow));
}
