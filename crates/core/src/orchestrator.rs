use crate::error::IndexingError;
use crate::models::{
    DocumentFilter, FileRecord, FileStatus, IndexedDocument, RunStatus, SearchRequest,
    StatusUpdate, WriteOutcome,
};
use crate::reconciler::StatusReconciler;
use crate::traits::WorkflowEngine;
use crate::workflow::{register, IndexFileArgs, IndexingContext, INDEX_FILE_WORKFLOW};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const DELETE_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ReindexReceipt {
    pub file_id: String,
    pub run_id: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowStatusReport {
    NoWorkflow,
    Run(RunStatus),
    /// The record names a run the engine could not report on.
    Unavailable { run_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDetail {
    pub document: IndexedDocument,
    pub blob_reference: String,
}

/// File-level operations: upload, status reads, re-index, delete and search.
/// Every read of a file record goes through the reconciler first.
pub struct IndexingCoordinator {
    context: Arc<IndexingContext>,
    engine: Arc<dyn WorkflowEngine>,
    reconciler: StatusReconciler,
}

impl IndexingCoordinator {
    /// Registers the indexing workflow on `engine` and returns a coordinator
    /// that invokes it.
    pub fn new(context: Arc<IndexingContext>, engine: Arc<dyn WorkflowEngine>) -> Self {
        register(engine.as_ref(), Arc::clone(&context));
        let reconciler = StatusReconciler::new(Arc::clone(&engine), Arc::clone(&context.records));
        Self {
            context,
            engine,
            reconciler,
        }
    }

    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<FileRecord, IndexingError> {
        if owner_id.trim().is_empty() {
            return Err(IndexingError::Validation("owner id is empty".to_string()));
        }
        if filename.trim().is_empty() || filename.contains(['/', '\\']) {
            return Err(IndexingError::Validation(format!(
                "invalid filename: {filename:?}"
            )));
        }
        if bytes.is_empty() {
            return Err(IndexingError::Validation(format!("{filename} is empty")));
        }

        let file_id = Uuid::new_v4().to_string();
        let blob_reference = format!("{owner_id}/{file_id}_{filename}");

        self.context.blobs.upload(&blob_reference, bytes).await?;
        self.context
            .records
            .insert(FileRecord::new(&file_id, owner_id, filename, &blob_reference))
            .await?;
        info!(file_id = %file_id, owner_id, filename, "file uploaded");

        if let Err(start_error) = self.start_run(&file_id).await {
            warn!(file_id = %file_id, error = %start_error, "upload stored without an indexing run");
        }

        self.stored_record(&file_id).await
    }

    pub async fn list_files(&self, owner_id: &str) -> Result<Vec<FileRecord>, IndexingError> {
        let records = self.context.records.list_by_owner(owner_id).await?;
        Ok(self.reconciler.reconcile_all(records).await)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileRecord, IndexingError> {
        let record = self.stored_record(file_id).await?;
        Ok(self.reconciler.reconcile(record).await)
    }

    /// Starts a fresh run. Any earlier run for the file is fenced off and its
    /// late status writes are dropped.
    pub async fn reindex(&self, file_id: &str) -> Result<ReindexReceipt, IndexingError> {
        self.stored_record(file_id).await?;
        let run_id = self.start_run(file_id).await?;

        Ok(ReindexReceipt {
            file_id: file_id.to_string(),
            run_id,
            status: FileStatus::Pending,
        })
    }

    /// Removes the file's chunks, blob and record. Returns `false` when the
    /// file was unknown.
    pub async fn delete(&self, file_id: &str) -> Result<bool, IndexingError> {
        let Some(record) = self.context.records.get(file_id).await? else {
            return Ok(false);
        };

        match self.delete_chunks(file_id).await {
            Ok(removed) => info!(file_id, removed, "deleted indexed chunks"),
            Err(index_error) => {
                warn!(file_id, error = %index_error, "could not delete indexed chunks")
            }
        }

        if let Err(blob_error) = self.context.blobs.delete(&record.blob_reference).await {
            warn!(file_id, error = %blob_error, "could not delete blob");
        }

        let deleted = self.context.records.delete(file_id).await?;
        info!(file_id, deleted, "deleted file record");
        Ok(deleted)
    }

    pub async fn workflow_status(
        &self,
        file_id: &str,
    ) -> Result<WorkflowStatusReport, IndexingError> {
        let record = self.stored_record(file_id).await?;
        let Some(run_id) = record.run_id else {
            return Ok(WorkflowStatusReport::NoWorkflow);
        };

        Ok(match self.engine.get_run_status(&run_id).await {
            Ok(run) => WorkflowStatusReport::Run(run),
            Err(poll_error) => WorkflowStatusReport::Unavailable {
                run_id,
                error: poll_error.to_string(),
            },
        })
    }

    pub async fn chunk_detail(&self, chunk_id: &str) -> Result<ChunkDetail, IndexingError> {
        let request = SearchRequest::filtered(
            DocumentFilter {
                id: Some(chunk_id.to_string()),
                ..DocumentFilter::default()
            },
            1,
        );

        let document = self
            .context
            .search
            .search(&request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexingError::not_found("chunk", chunk_id))?;
        let record = self.stored_record(&document.file_id).await?;

        Ok(ChunkDetail {
            document,
            blob_reference: record.blob_reference,
        })
    }

    /// Vector search over the owner's chunks.
    pub async fn search(
        &self,
        owner_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<IndexedDocument>, IndexingError> {
        if query.trim().is_empty() {
            return Err(IndexingError::Validation("query is empty".to_string()));
        }
        if top_k == 0 {
            return Err(IndexingError::Validation("top_k must be positive".to_string()));
        }

        let vector = self.context.embedder.embed(query).await?;
        let request = SearchRequest {
            text: None,
            vector: Some(vector),
            filters: DocumentFilter {
                owner_id: Some(owner_id.to_string()),
                ..DocumentFilter::default()
            },
            top_k,
        };

        Ok(self.context.search.search(&request).await?)
    }

    async fn stored_record(&self, file_id: &str) -> Result<FileRecord, IndexingError> {
        self.context
            .records
            .get(file_id)
            .await?
            .ok_or_else(|| IndexingError::not_found("file", file_id))
    }

    /// Bumps the generation, invokes the workflow and attaches the run id. A
    /// failed invocation marks the record failed and returns the error.
    async fn start_run(&self, file_id: &str) -> Result<String, IndexingError> {
        let records = &self.context.records;
        let generation = records.begin_run(file_id).await?;
        let args = IndexFileArgs {
            file_id: file_id.to_string(),
            generation,
        };

        let run_id = match self
            .engine
            .invoke_workflow(INDEX_FILE_WORKFLOW, serde_json::to_value(&args)?)
            .await
        {
            Ok(run_id) => run_id,
            Err(invoke_error) => {
                error!(file_id, error = %invoke_error, "failed to start indexing workflow");
                let update = StatusUpdate::failed(format!("failed to start indexing: {invoke_error}"));
                records.update_status(file_id, generation, &update).await?;
                return Err(invoke_error);
            }
        };

        if records.set_run_id(file_id, generation, &run_id).await? == WriteOutcome::Stale {
            warn!(file_id, run_id = %run_id, "a newer run started before this one was recorded");
        }
        info!(file_id, run_id = %run_id, generation, "indexing workflow invoked");
        Ok(run_id)
    }

    async fn delete_chunks(&self, file_id: &str) -> Result<usize, IndexingError> {
        let request = SearchRequest::filtered(
            DocumentFilter {
                file_id: Some(file_id.to_string()),
                ..DocumentFilter::default()
            },
            DELETE_PAGE_SIZE,
        );

        let mut removed = 0;
        loop {
            let ids: Vec<String> = self
                .context
                .search
                .search(&request)
                .await?
                .into_iter()
                .map(|document| document.id)
                .collect();

            if ids.is_empty() {
                return Ok(removed);
            }

            self.context.search.delete_documents(&ids).await?;
            removed += ids.len();

            if ids.len() < DELETE_PAGE_SIZE {
                return Ok(removed);
            }
        }
    }
}
