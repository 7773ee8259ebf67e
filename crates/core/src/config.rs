use crate::embeddings::{CharacterNgramEmbedder, OpenAiEmbeddingClient};
use crate::error::ConfigError;
use crate::extractor::{HttpLayoutAnalyzer, LocalAnalyzer};
use crate::traits::{DocumentAnalyzer, EmbeddingService};
use std::env;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerEndpoint {
    pub endpoint: Url,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingEndpoint {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub model: String,
}

/// Remote services used by the pipeline. A missing endpoint selects the
/// local fallback for that concern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub analyzer: Option<AnalyzerEndpoint>,
    pub embedding: Option<EmbeddingEndpoint>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let analyzer = read("DOCINDEX_ANALYZER_ENDPOINT")
            .map(|raw| {
                Ok::<_, ConfigError>(AnalyzerEndpoint {
                    endpoint: parse_url("DOCINDEX_ANALYZER_ENDPOINT", &raw)?,
                    api_key: read("DOCINDEX_ANALYZER_API_KEY"),
                })
            })
            .transpose()?;

        let embedding = read("DOCINDEX_EMBEDDING_ENDPOINT")
            .map(|raw| {
                Ok::<_, ConfigError>(EmbeddingEndpoint {
                    endpoint: parse_url("DOCINDEX_EMBEDDING_ENDPOINT", &raw)?,
                    api_key: read("DOCINDEX_EMBEDDING_API_KEY"),
                    model: read("DOCINDEX_EMBEDDING_MODEL")
                        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                })
            })
            .transpose()?;

        Ok(Self {
            analyzer,
            embedding,
        })
    }

    pub fn document_analyzer(&self) -> Arc<dyn DocumentAnalyzer> {
        match &self.analyzer {
            Some(remote) => Arc::new(HttpLayoutAnalyzer::new(
                remote.endpoint.as_str(),
                remote.api_key.clone(),
            )),
            None => Arc::new(LocalAnalyzer),
        }
    }

    pub fn embedding_service(&self, dimensions: usize) -> Arc<dyn EmbeddingService> {
        match &self.embedding {
            Some(remote) => Arc::new(OpenAiEmbeddingClient::new(
                remote.endpoint.as_str(),
                remote.model.clone(),
                remote.api_key.clone(),
                dimensions,
            )),
            None => Arc::new(CharacterNgramEmbedder::new(dimensions)),
        }
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|error| ConfigError::InvalidValue {
        key: key.to_string(),
        details: error.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            details: format!("unsupported scheme {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn blank_values_count_as_absent() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("DOCINDEX_ANALYZER_ENDPOINT", "   "),
            ("DOCINDEX_EMBEDDING_ENDPOINT", ""),
        ]))
        .expect("config");

        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn embedding_endpoint_defaults_its_model() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("DOCINDEX_EMBEDDING_ENDPOINT", "https://api.openai.com/v1"),
            ("DOCINDEX_EMBEDDING_API_KEY", "sk-test"),
        ]))
        .expect("config");

        let embedding = config.embedding.expect("embedding endpoint");
        assert_eq!(embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(embedding.api_key.as_deref(), Some("sk-test"));
        assert!(config.analyzer.is_none());
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        for raw in ["not a url", "ftp://example.com"] {
            let result =
                ServiceConfig::from_lookup(lookup(&[("DOCINDEX_ANALYZER_ENDPOINT", raw)]));
            assert!(matches!(
                result,
                Err(ConfigError::InvalidValue { ref key, .. }) if key == "DOCINDEX_ANALYZER_ENDPOINT"
            ));
        }
    }

    #[test]
    fn local_fallbacks_honour_the_dimension() {
        let embedder = ServiceConfig::default().embedding_service(64);
        assert_eq!(embedder.dimensions(), 64);
    }
}
