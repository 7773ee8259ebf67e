use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only transitions within one run. Leaving a terminal status
    /// requires a new run (see `FileRecord::begin_run`).
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        match (self, next) {
            (current, next) if current == next => false,
            (current, _) if current.is_terminal() => false,
            (Self::Pending, _) => true,
            (Self::InProgress, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_id: String,
    pub owner_id: String,
    pub filename: String,
    pub blob_reference: String,
    pub status: FileStatus,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub run_id: Option<String>,
    #[serde(default)]
    pub generation: u64,
}

impl FileRecord {
    pub fn new(
        file_id: impl Into<String>,
        owner_id: impl Into<String>,
        filename: impl Into<String>,
        blob_reference: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            owner_id: owner_id.into(),
            filename: filename.into(),
            blob_reference: blob_reference.into(),
            status: FileStatus::Pending,
            uploaded_at: Utc::now(),
            indexed_at: None,
            error_message: None,
            run_id: None,
            generation: 0,
        }
    }

    /// Resets the record for a fresh run and returns the new generation.
    /// The previous `run_id` is detached so reads never reconcile the new
    /// generation against the old run.
    pub fn begin_run(&mut self) -> u64 {
        self.generation = self.generation.saturating_add(1);
        self.status = FileStatus::Pending;
        self.run_id = None;
        self.indexed_at = None;
        self.error_message = None;
        self.generation
    }

    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.indexed_at = match update.status {
            FileStatus::Completed => Some(now),
            _ => None,
        };
        self.error_message = match update.status {
            FileStatus::Failed => Some(
                update
                    .error_message
                    .clone()
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| "indexing failed".to_string()),
            ),
            _ => None,
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: FileStatus,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: FileStatus) -> Self {
        Self {
            status,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: FileStatus::Failed,
            error_message: Some(message.into()),
        }
    }
}

/// Outcome of a fenced status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The record moved on to a newer generation, or its stored status
    /// cannot move to the requested one; the write was dropped.
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub content: String,
    pub file_id: String,
    pub filename: String,
    pub owner_id: String,
    pub chunk_index: u32,
    pub embedding: Vec<f32>,
}

pub fn document_id(file_id: &str, chunk_index: u32) -> String {
    format!("{file_id}_{chunk_index}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int32,
    Vector,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    pub key: bool,
    pub searchable: bool,
    pub filterable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorConfig {
    pub field: String,
    pub dimensions: usize,
    pub profile: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SemanticConfig {
    pub name: String,
    pub content_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<SchemaField>,
    pub vector: VectorConfig,
    pub semantic: Option<SemanticConfig>,
}

impl IndexSchema {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadAck {
    pub id: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocumentFilter {
    pub id: Option<String>,
    pub file_id: Option<String>,
    pub owner_id: Option<String>,
}

impl DocumentFilter {
    pub fn matches(&self, document: &IndexedDocument) -> bool {
        self.id.as_ref().map_or(true, |id| &document.id == id)
            && self
                .file_id
                .as_ref()
                .map_or(true, |file_id| &document.file_id == file_id)
            && self
                .owner_id
                .as_ref()
                .map_or(true, |owner_id| &document.owner_id == owner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub filters: DocumentFilter,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn filtered(filters: DocumentFilter, top_k: usize) -> Self {
        Self {
            text: None,
            vector: None,
            filters,
            top_k,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatus {
    pub run_id: String,
    pub workflow: String,
    pub state: RunState,
    pub error: Option<String>,
    pub completed_activities: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub index_name: String,
    pub embedding_dimensions: usize,
    pub vector_profile: String,
    pub semantic_config: String,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 200,
            index_name: "documents".to_string(),
            embedding_dimensions: 1_536,
            vector_profile: "vector-profile".to_string(),
            semantic_config: "semantic-config".to_string(),
        }
    }
}

impl IndexingOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_max_chars == 0 {
            return Err(ConfigError::InvalidChunkConfig(
                "chunk_max_chars must be positive".to_string(),
            ));
        }
        if self.chunk_overlap_chars >= self.chunk_max_chars {
            return Err(ConfigError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.chunk_overlap_chars, self.chunk_max_chars
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "embedding_dimensions".to_string(),
                details: "must be positive".to_string(),
            });
        }
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "index_name".to_string(),
                details: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
