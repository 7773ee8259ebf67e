use crate::error::{IndexingError, SearchError};
use crate::models::{
    CreateOutcome, FileRecord, IndexSchema, IndexedDocument, SearchRequest, StatusUpdate,
    UploadAck, WriteOutcome,
};
use crate::stores::table::RecordTable;
use crate::traits::{BlobStore, FileRecordStore, SearchIndexService};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process search index with brute-force cosine ranking.
#[derive(Default)]
pub struct MemorySearchIndex {
    schemas: RwLock<HashMap<String, IndexSchema>>,
    documents: RwLock<BTreeMap<String, IndexedDocument>>,
}

impl MemorySearchIndex {
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn document(&self, id: &str) -> Option<IndexedDocument> {
        self.documents.read().await.get(id).cloned()
    }

    async fn expected_dimensions(&self) -> Option<usize> {
        let schemas = self.schemas.read().await;
        let mut dimensions = schemas.values().map(|schema| schema.vector.dimensions);
        let first = dimensions.next()?;
        dimensions.all(|other| other == first).then_some(first)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn text_score(content: &str, query: &str) -> f32 {
    let lowered = content.to_lowercase();
    query
        .split_whitespace()
        .filter(|term| lowered.contains(&term.to_lowercase()))
        .count() as f32
}

#[async_trait]
impl SearchIndexService for MemorySearchIndex {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, SearchError> {
        Ok(self.schemas.read().await.get(name).cloned())
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome, SearchError> {
        let mut schemas = self.schemas.write().await;
        if schemas.contains_key(&schema.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        schemas.insert(schema.name.clone(), schema.clone());
        Ok(CreateOutcome::Created)
    }

    async fn upload_documents(
        &self,
        documents: &[IndexedDocument],
    ) -> Result<Vec<UploadAck>, SearchError> {
        let expected = self.expected_dimensions().await;
        let mut stored = self.documents.write().await;

        Ok(documents
            .iter()
            .map(|document| match expected {
                Some(dimensions) if document.embedding.len() != dimensions => UploadAck {
                    id: document.id.clone(),
                    succeeded: false,
                    error: Some(format!(
                        "embedding has {} dimensions, index expects {dimensions}",
                        document.embedding.len()
                    )),
                },
                _ => {
                    stored.insert(document.id.clone(), document.clone());
                    UploadAck {
                        id: document.id.clone(),
                        succeeded: true,
                        error: None,
                    }
                }
            })
            .collect())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), SearchError> {
        let mut stored = self.documents.write().await;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<IndexedDocument>, SearchError> {
        let stored = self.documents.read().await;
        let mut scored: Vec<(f32, &IndexedDocument)> = stored
            .values()
            .filter(|document| request.filters.matches(document))
            .filter_map(|document| {
                let score = match (&request.vector, &request.text) {
                    (Some(vector), _) => cosine_similarity(vector, &document.embedding),
                    (None, Some(text)) if text.trim() != "*" => {
                        let score = text_score(&document.content, text);
                        if score == 0.0 {
                            return None;
                        }
                        score
                    }
                    _ => 0.0,
                };
                Some((score, document))
            })
            .collect();

        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        Ok(scored
            .into_iter()
            .take(request.top_k)
            .map(|(_, document)| document.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, reference: &str, bytes: Vec<u8>) -> Result<(), IndexingError> {
        self.blobs.write().await.insert(reference.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, IndexingError> {
        self.blobs
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| IndexingError::not_found("blob", reference))
    }

    async fn delete(&self, reference: &str) -> Result<(), IndexingError> {
        self.blobs
            .write()
            .await
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| IndexingError::not_found("blob", reference))
    }
}

#[derive(Default)]
pub struct MemoryFileRecordStore {
    table: RwLock<RecordTable>,
}

#[async_trait]
impl FileRecordStore for MemoryFileRecordStore {
    async fn insert(&self, record: FileRecord) -> Result<(), IndexingError> {
        self.table.write().await.insert(record)
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, IndexingError> {
        Ok(self.table.read().await.get(file_id))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, IndexingError> {
        Ok(self.table.read().await.list_by_owner(owner_id))
    }

    async fn begin_run(&self, file_id: &str) -> Result<u64, IndexingError> {
        self.table.write().await.begin_run(file_id)
    }

    async fn set_run_id(
        &self,
        file_id: &str,
        generation: u64,
        run_id: &str,
    ) -> Result<WriteOutcome, IndexingError> {
        self.table
            .write()
            .await
            .set_run_id(file_id, generation, run_id)
    }

    async fn update_status(
        &self,
        file_id: &str,
        generation: u64,
        update: &StatusUpdate,
    ) -> Result<WriteOutcome, IndexingError> {
        self.table
            .write()
            .await
            .update_status(file_id, generation, update)
    }

    async fn delete(&self, file_id: &str) -> Result<bool, IndexingError> {
        Ok(self.table.write().await.delete(file_id))
    }
}
