use crate::error::IndexingError;
use crate::models::{document_id, IndexedDocument};
use crate::traits::{EmbeddingService, FileRecordStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

/// Embeds chunks one at a time. The first embedding failure aborts the whole
/// call and nothing embedded so far is returned.
pub async fn embed_chunks(
    embedder: &dyn EmbeddingService,
    records: &dyn FileRecordStore,
    chunks: &[String],
    file_id: &str,
) -> Result<Vec<IndexedDocument>, IndexingError> {
    if chunks.is_empty() {
        return Err(IndexingError::Validation(format!(
            "no chunks to embed for file {file_id}"
        )));
    }

    let record = records
        .get(file_id)
        .await?
        .ok_or_else(|| IndexingError::not_found("file", file_id))?;

    let mut documents = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let chunk_index = u32::try_from(index).map_err(|_| {
            IndexingError::Validation(format!("too many chunks for file {file_id}"))
        })?;

        let embedding = embedder.embed(chunk).await.map_err(|failure| {
            error!(file_id, chunk_index, error = %failure, "embedding failed");
            failure
        })?;

        if embedding.len() != embedder.dimensions() {
            return Err(IndexingError::upstream(
                "embedding",
                format!(
                    "expected {} dimensions, got {}",
                    embedder.dimensions(),
                    embedding.len()
                ),
            ));
        }

        documents.push(IndexedDocument {
            id: document_id(file_id, chunk_index),
            content: chunk.clone(),
            file_id: record.file_id.clone(),
            filename: record.filename.clone(),
            owner_id: record.owner_id.clone(),
            chunk_index,
            embedding,
        });
    }

    info!(file_id, count = documents.len(), "generated embeddings");
    Ok(documents)
}

const NGRAM_CHARS: usize = 3;
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Offline embedder for local runs and tests: case-folded character trigrams
/// hashed into `dimensions` buckets, then L2-normalised.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Extracted chunks keep page breaks and wrapped lines, so every whitespace
/// run becomes one space and words are padded on both sides.
fn folded_chars(text: &str) -> Vec<char> {
    let mut folded = vec![' '];
    for word in text.split_whitespace() {
        folded.extend(word.chars().flat_map(char::to_lowercase));
        folded.push(' ');
    }
    folded
}

fn fnv1a(window: &[char]) -> u64 {
    let mut utf8 = [0u8; 4];
    window.iter().fold(FNV_OFFSET_BASIS, |hash, ch| {
        ch.encode_utf8(&mut utf8)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    })
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Returns the zero vector for text without any word.
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars = folded_chars(text);
        if chars.len() <= 1 {
            return vector;
        }

        let buckets = vector.len() as u64;
        for window in chars.windows(NGRAM_CHARS) {
            vector[(fnv1a(window) % buckets) as usize] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        for value in &mut vector {
            *value /= magnitude;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexingError> {
        Ok(self.vectorize(text))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints. Retries belong to
/// the workflow engine, so a failed call is reported straight away.
pub struct OpenAiEmbeddingClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(
        base_url: impl AsRef<str>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/embeddings", base_url.as_ref().trim_end_matches('/')),
            model: model.into(),
            api_key,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexingError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(IndexingError::upstream(
                "embedding",
                format!("request failed ({status}): {body}"),
            ));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| IndexingError::upstream("embedding", "response had no embedding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileRecord;
    use crate::stores::MemoryFileRecordStore;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingAfter {
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl EmbeddingService for FailingAfter {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                Err(IndexingError::upstream("embedding", "rate limited"))
            } else {
                Ok(vec![0.5; 4])
            }
        }
    }

    async fn store_with_file() -> MemoryFileRecordStore {
        let records = MemoryFileRecordStore::default();
        records
            .insert(FileRecord::new("f-1", "owner-1", "manual.pdf", "owner-1/f-1_manual.pdf"))
            .await
            .expect("insert");
        records
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.vectorize("Hydraulic pressure and flow");
        let second = embedder.vectorize("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn layout_whitespace_and_case_do_not_change_the_vector() {
        let embedder = CharacterNgramEmbedder::new(64);
        let flowed = embedder.vectorize("Pump pressure readings");
        let extracted = embedder.vectorize("  PUMP\npressure\u{c}\n\treadings ");
        assert_eq!(flowed, extracted);
    }

    #[test]
    fn vectors_are_unit_length_unless_text_is_blank() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.vectorize("a");
        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        assert!(embedder.vectorize(" \n\t").iter().all(|value| *value == 0.0));
    }

    #[tokio::test]
    async fn documents_get_deterministic_ids_and_file_metadata() {
        let records = store_with_file().await;
        let chunks = vec!["first".to_string(), "second".to_string()];

        let documents = embed_chunks(&CharacterNgramEmbedder::new(8), &records, &chunks, "f-1")
            .await
            .expect("embedding");

        let ids: Vec<_> = documents.iter().map(|document| document.id.as_str()).collect();
        assert_eq!(ids, vec!["f-1_0", "f-1_1"]);
        assert_eq!(documents[1].chunk_index, 1);
        assert_eq!(documents[1].owner_id, "owner-1");
        assert_eq!(documents[1].filename, "manual.pdf");
        assert_eq!(documents[0].embedding.len(), 8);
    }

    #[tokio::test]
    async fn first_failure_aborts_remaining_chunks() {
        let records = store_with_file().await;
        let embedder = FailingAfter {
            calls: AtomicUsize::new(0),
            fail_on: 1,
        };
        let chunks = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let result = embed_chunks(&embedder, &records, &chunks, "f-1").await;

        assert!(matches!(result, Err(IndexingError::Upstream { .. })));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_chunk_list_is_a_validation_error() {
        let records = store_with_file().await;
        let result = embed_chunks(&CharacterNgramEmbedder::new(8), &records, &[], "f-1").await;
        assert!(matches!(result, Err(IndexingError::Validation(_))));
    }

    #[tokio::test]
    async fn openai_client_posts_model_and_input() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer secret")
                    .json_body(json!({"model": "text-embedding-3-small", "input": "hello", "dimensions": 3}));
                then.status(200).json_body(json!({
                    "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
                }));
            })
            .await;

        let client = OpenAiEmbeddingClient::new(
            format!("{}/v1/", server.base_url()),
            "text-embedding-3-small",
            Some("secret".to_string()),
            3,
        );
        let vector = client.embed("hello").await.expect("embedding");

        mock.assert_async().await;
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn openai_client_reports_upstream_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("slow down");
            })
            .await;

        let client = OpenAiEmbeddingClient::new(server.base_url(), "m", None, 3);
        let result = client.embed("hello").await;

        match result {
            Err(IndexingError::Upstream { details, .. }) => assert!(details.contains("429")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
