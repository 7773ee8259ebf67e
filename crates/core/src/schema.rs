use crate::models::{
    CreateOutcome, FieldKind, IndexSchema, IndexingOptions, SchemaField, SemanticConfig,
    VectorConfig,
};
use crate::traits::SearchIndexService;
use tracing::{error, info, warn};

pub const ID_FIELD: &str = "id";
pub const CONTENT_FIELD: &str = "content";
pub const FILE_ID_FIELD: &str = "file_id";
pub const FILENAME_FIELD: &str = "filename";
pub const OWNER_FIELD: &str = "owner_id";
pub const CHUNK_INDEX_FIELD: &str = "chunk_index";
pub const EMBEDDING_FIELD: &str = "embedding";

fn field(name: &str, kind: FieldKind, searchable: bool, filterable: bool) -> SchemaField {
    SchemaField {
        name: name.to_string(),
        kind,
        key: false,
        searchable,
        filterable,
    }
}

pub fn document_index_schema(options: &IndexingOptions) -> IndexSchema {
    IndexSchema {
        name: options.index_name.clone(),
        fields: vec![
            SchemaField {
                key: true,
                ..field(ID_FIELD, FieldKind::String, false, true)
            },
            field(CONTENT_FIELD, FieldKind::String, true, false),
            field(FILE_ID_FIELD, FieldKind::String, true, true),
            field(FILENAME_FIELD, FieldKind::String, true, true),
            field(OWNER_FIELD, FieldKind::String, false, true),
            field(CHUNK_INDEX_FIELD, FieldKind::Int32, false, true),
            field(EMBEDDING_FIELD, FieldKind::Vector, true, false),
        ],
        vector: VectorConfig {
            field: EMBEDDING_FIELD.to_string(),
            dimensions: options.embedding_dimensions,
            profile: options.vector_profile.clone(),
            algorithm: "hnsw".to_string(),
        },
        semantic: Some(SemanticConfig {
            name: options.semantic_config.clone(),
            content_fields: vec![CONTENT_FIELD.to_string()],
        }),
    }
}

/// Creates the index when it is missing. An existing index is left untouched,
/// and losing a creation race to another run still counts as success.
pub async fn ensure_index(search: &dyn SearchIndexService, schema: &IndexSchema) -> bool {
    match search.get_index(&schema.name).await {
        Ok(Some(existing)) => {
            if existing.vector.dimensions != schema.vector.dimensions {
                warn!(
                    index = %schema.name,
                    existing = existing.vector.dimensions,
                    configured = schema.vector.dimensions,
                    "search index exists with a different vector dimension"
                );
            }
            info!(index = %schema.name, "search index already exists");
            return true;
        }
        Ok(None) => info!(index = %schema.name, "creating search index"),
        Err(lookup_error) => warn!(
            index = %schema.name,
            error = %lookup_error,
            "search index lookup failed, attempting creation"
        ),
    }

    match search.create_index(schema).await {
        Ok(CreateOutcome::Created) => {
            info!(index = %schema.name, "created search index");
            true
        }
        Ok(CreateOutcome::AlreadyExists) => {
            info!(index = %schema.name, "search index was created concurrently");
            true
        }
        Err(create_error) => {
            error!(index = %schema.name, error = %create_error, "failed to ensure search index");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::models::{IndexedDocument, SearchRequest, UploadAck};
    use crate::stores::MemorySearchIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RacingIndex {
        creates: AtomicUsize,
        fail_create: bool,
    }

    #[async_trait]
    impl SearchIndexService for RacingIndex {
        async fn get_index(&self, _name: &str) -> Result<Option<IndexSchema>, SearchError> {
            Ok(None)
        }

        async fn create_index(&self, _schema: &IndexSchema) -> Result<CreateOutcome, SearchError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                Err(SearchError::Request("forbidden".to_string()))
            } else {
                Ok(CreateOutcome::AlreadyExists)
            }
        }

        async fn upload_documents(
            &self,
            _documents: &[IndexedDocument],
        ) -> Result<Vec<UploadAck>, SearchError> {
            Ok(Vec::new())
        }

        async fn delete_documents(&self, _ids: &[String]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn search(
            &self,
            _request: &SearchRequest,
        ) -> Result<Vec<IndexedDocument>, SearchError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn schema_has_key_filters_vector_and_semantic_profile() {
        let schema = document_index_schema(&IndexingOptions::default());

        assert!(schema.field(ID_FIELD).is_some_and(|field| field.key));
        assert!(schema.field(CONTENT_FIELD).is_some_and(|field| field.searchable));
        for name in [OWNER_FIELD, FILENAME_FIELD, FILE_ID_FIELD, CHUNK_INDEX_FIELD] {
            assert!(schema.field(name).is_some_and(|field| field.filterable), "{name}");
        }
        assert_eq!(schema.vector.dimensions, 1_536);
        assert_eq!(
            schema.semantic.as_ref().map(|semantic| semantic.content_fields.clone()),
            Some(vec![CONTENT_FIELD.to_string()])
        );
    }

    #[tokio::test]
    async fn ensuring_twice_keeps_the_first_schema() {
        let index = MemorySearchIndex::default();
        let schema = document_index_schema(&IndexingOptions::default());
        let altered = IndexSchema {
            semantic: None,
            ..schema.clone()
        };

        assert!(ensure_index(&index, &schema).await);
        assert!(ensure_index(&index, &altered).await);

        let stored = index.get_index(&schema.name).await.expect("lookup");
        assert_eq!(stored, Some(schema));
    }

    #[tokio::test]
    async fn creation_conflict_counts_as_success() {
        let index = RacingIndex {
            creates: AtomicUsize::new(0),
            fail_create: false,
        };
        let schema = document_index_schema(&IndexingOptions::default());

        assert!(ensure_index(&index, &schema).await);
        assert_eq!(index.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provisioning_errors_return_false() {
        let index = RacingIndex {
            creates: AtomicUsize::new(0),
            fail_create: true,
        };
        let schema = document_index_schema(&IndexingOptions::default());

        assert!(!ensure_index(&index, &schema).await);
    }
}
