use crate::error::SearchError;
use crate::models::{
    CreateOutcome, DocumentFilter, FieldKind, IndexSchema, IndexedDocument, SchemaField,
    SearchRequest, UploadAck, VectorConfig,
};
use crate::schema::{CONTENT_FIELD, EMBEDDING_FIELD, FILE_ID_FIELD, ID_FIELD, OWNER_FIELD};
use crate::traits::SearchIndexService;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

const BACKEND: &str = "opensearch";

pub struct OpenSearchIndex {
    client: Arc<Client>,
    endpoint: String,
    index_name: String,
}

impl OpenSearchIndex {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name: index_name.into(),
        }
    }

    fn index_url(&self, name: &str) -> String {
        format!("{}/{}", self.endpoint, name)
    }

    async fn bulk(&self, operations: Vec<Value>) -> Result<Value, SearchError> {
        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=wait_for", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        Ok(response.json().await?)
    }
}

fn backend_error(details: impl Into<String>) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

#[async_trait]
impl SearchIndexService for OpenSearchIndex {
    async fn get_index(&self, name: &str) -> Result<Option<IndexSchema>, SearchError> {
        let response = self.client.get(self.index_url(name)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let body: Value = response.json().await?;
        let mappings = body
            .get(name)
            .and_then(|index| index.get("mappings"))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(Some(schema_from_mappings(name, &mappings)))
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome, SearchError> {
        let response = self
            .client
            .put(self.index_url(&schema.name))
            .json(&index_body(schema)?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CreateOutcome::Created);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error_type = body
            .pointer("/error/type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if status == StatusCode::BAD_REQUEST && error_type == "resource_already_exists_exception" {
            return Ok(CreateOutcome::AlreadyExists);
        }

        Err(SearchError::Request(format!(
            "index setup failed with {status}: {error_type}"
        )))
    }

    async fn upload_documents(
        &self,
        documents: &[IndexedDocument],
    ) -> Result<Vec<UploadAck>, SearchError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut operations = Vec::with_capacity(documents.len() * 2);
        for document in documents {
            operations.push(json!({
                "index": {
                    "_index": self.index_name,
                    "_id": document.id,
                }
            }));
            operations.push(serde_json::to_value(document)?);
        }

        let response = self.bulk(operations).await?;
        let acks = parse_bulk_acks(&response, "index");
        debug!(submitted = documents.len(), acknowledged = acks.len(), "bulk upload finished");
        Ok(acks)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), SearchError> {
        if ids.is_empty() {
            return Ok(());
        }

        let operations = ids
            .iter()
            .map(|id| json!({"delete": {"_index": self.index_name, "_id": id}}))
            .collect();

        let response = self.bulk(operations).await?;
        let failed: Vec<_> = parse_bulk_acks(&response, "delete")
            .into_iter()
            .filter(|ack| !ack.succeeded)
            .map(|ack| ack.id)
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(backend_error(format!(
                "failed to delete documents: {}",
                failed.join(", ")
            )))
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<IndexedDocument>, SearchError> {
        let response = self
            .client
            .post(format!("{}/_search", self.index_url(&self.index_name)))
            .json(&search_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let response_json: Value = response.json().await?;
        let hits = response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.into_iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .map(|source| serde_json::from_value(source).map_err(SearchError::from))
            .collect()
    }
}

fn field_mapping(field: &SchemaField, vector: &VectorConfig) -> Value {
    match field.kind {
        FieldKind::Vector => json!({
            "type": "knn_vector",
            "dimension": vector.dimensions,
            "method": {
                "name": vector.algorithm,
                "space_type": "cosinesimil",
                "engine": "lucene"
            }
        }),
        FieldKind::Int32 => json!({"type": "integer"}),
        FieldKind::String if field.searchable && (field.filterable || field.key) => json!({
            "type": "keyword",
            "fields": {"text": {"type": "text"}}
        }),
        FieldKind::String if field.searchable => json!({"type": "text"}),
        FieldKind::String => json!({"type": "keyword"}),
    }
}

/// The full schema rides along in the mapping `_meta`, so it can be read back
/// exactly as it was provisioned.
fn index_body(schema: &IndexSchema) -> Result<Value, SearchError> {
    let properties = schema
        .fields
        .iter()
        .map(|field| (field.name.clone(), field_mapping(field, &schema.vector)))
        .collect::<Map<_, _>>();

    Ok(json!({
        "settings": {
            "index": {"knn": true},
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "_meta": {"schema": serde_json::to_value(schema)?},
            "properties": properties
        }
    }))
}

fn schema_from_mappings(name: &str, mappings: &Value) -> IndexSchema {
    if let Some(schema) = mappings
        .pointer("/_meta/schema")
        .cloned()
        .and_then(|raw| serde_json::from_value::<IndexSchema>(raw).ok())
    {
        return schema;
    }

    let properties = mappings
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut vector = VectorConfig {
        field: String::new(),
        dimensions: 0,
        profile: String::new(),
        algorithm: String::new(),
    };

    let fields = properties
        .iter()
        .map(|(field_name, mapping)| {
            let field_type = mapping.get("type").and_then(Value::as_str).unwrap_or_default();
            let kind = match field_type {
                "knn_vector" => {
                    vector.field = field_name.clone();
                    vector.dimensions = mapping
                        .get("dimension")
                        .and_then(Value::as_u64)
                        .unwrap_or_default() as usize;
                    vector.algorithm = mapping
                        .pointer("/method/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    FieldKind::Vector
                }
                "integer" | "long" => FieldKind::Int32,
                _ => FieldKind::String,
            };

            SchemaField {
                name: field_name.clone(),
                kind,
                key: field_name == ID_FIELD,
                searchable: matches!(field_type, "text" | "knn_vector")
                    || mapping.pointer("/fields/text").is_some(),
                filterable: matches!(field_type, "keyword" | "integer" | "long"),
            }
        })
        .collect();

    IndexSchema {
        name: name.to_string(),
        fields,
        vector,
        semantic: None,
    }
}

fn parse_bulk_acks(response: &Value, action: &str) -> Vec<UploadAck> {
    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(action))
                .map(|result| {
                    let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
                    let tolerated = action == "delete" && status == 404;
                    UploadAck {
                        id: result
                            .get("_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        succeeded: (200..300).contains(&status) || tolerated,
                        error: result
                            .pointer("/error/reason")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn build_filters(filters: &DocumentFilter) -> Vec<Value> {
    let mut predicates = Vec::new();

    if let Some(id) = &filters.id {
        predicates.push(json!({"term": {ID_FIELD: id}}));
    }
    if let Some(file_id) = &filters.file_id {
        predicates.push(json!({"term": {FILE_ID_FIELD: file_id}}));
    }
    if let Some(owner_id) = &filters.owner_id {
        predicates.push(json!({"term": {OWNER_FIELD: owner_id}}));
    }

    predicates
}

fn search_body(request: &SearchRequest) -> Value {
    let must = match (&request.vector, &request.text) {
        (Some(vector), _) => json!({
            "knn": {
                EMBEDDING_FIELD: {
                    "vector": vector,
                    "k": request.top_k
                }
            }
        }),
        (None, Some(text)) if text.trim() != "*" && !text.trim().is_empty() => json!({
            "match": {CONTENT_FIELD: text}
        }),
        _ => json!({"match_all": {}}),
    };

    json!({
        "size": request.top_k,
        "query": {
            "bool": {
                "must": [must],
                "filter": build_filters(&request.filters)
            }
        }
    })
}
