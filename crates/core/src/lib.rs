pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod schema;
pub mod store;
pub mod stores;
pub mod traits;
pub mod workflow;

pub use chunking::{chunk_text, ChunkingConfig, DEFAULT_SEPARATORS};
pub use config::{AnalyzerEndpoint, EmbeddingEndpoint, ServiceConfig};
pub use embeddings::{
    embed_chunks, CharacterNgramEmbedder, OpenAiEmbeddingClient, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::LocalWorkflowEngine;
pub use error::{ConfigError, IndexingError, SearchError};
pub use extractor::{extract_content, render_markdown, HttpLayoutAnalyzer, LocalAnalyzer};
pub use ingest::{discover_files, upload_candidates, DEFAULT_EXTENSIONS};
pub use models::{
    document_id, DocumentFilter, FileRecord, FileStatus, IndexSchema, IndexedDocument,
    IndexingOptions, RunState, RunStatus, SearchRequest, StatusUpdate,
};
pub use orchestrator::{ChunkDetail, IndexingCoordinator, ReindexReceipt, WorkflowStatusReport};
pub use reconciler::StatusReconciler;
pub use schema::{document_index_schema, ensure_index};
pub use store::store_documents;
pub use stores::{
    FsBlobStore, JsonFileRecordStore, MemoryBlobStore, MemoryFileRecordStore, MemorySearchIndex,
    OpenSearchIndex,
};
pub use traits::{
    Activity, ActivityContext, BlobStore, DocumentAnalyzer, EmbeddingService, FileRecordStore,
    SearchIndexService, Workflow, WorkflowEngine,
};
pub use workflow::{IndexFileArgs, IndexingContext, IndexingWorkflow};
