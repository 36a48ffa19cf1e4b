use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::QueryError;

/// Seam between the pipeline and the model-serving process.
///
/// The production implementation talks to a local Ollama server; tests
/// substitute in-process fakes to exercise the pipeline without a model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Maps a text to its embedding vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError>;

    /// Embeds a batch of texts in one round trip where the server allows it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError>;

    /// Generates a completion for `prompt` under `system`.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, QueryError>;
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingRequest<'a> {
    Single { model: &'a str, input: &'a str },
    Batch { model: &'a str, input: &'a [String] },
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama client serving both the embedding and the generation model,
/// with an LRU cache over question embeddings.
pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    embedding_model: String,
    generation_model: String,
    query_cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| QueryError::UpstreamUnavailable(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.ollama_url.clone(),
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            query_cache: RwLock::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
        })
    }

    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    /// Verifies the server is reachable and both configured models are
    /// pulled. Called once at startup so a misconfigured deployment fails
    /// fast instead of erroring on the first request.
    pub async fn verify(&self) -> Result<(), QueryError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| {
                QueryError::UpstreamUnavailable(format!(
                    "cannot connect to Ollama at {}: {e}",
                    self.url
                ))
            })?;

        if !response.status().is_success() {
            return Err(QueryError::UpstreamUnavailable(format!(
                "Ollama at {} returned {}",
                self.url,
                response.status()
            )));
        }

        let tags: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryError::UpstreamUnavailable(format!("invalid tags response: {e}")))?;
        let models: Vec<&str> = tags["models"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|m| m["name"].as_str())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for wanted in [&self.embedding_model, &self.generation_model] {
            if !models.iter().any(|name| name.starts_with(wanted.as_str())) {
                return Err(QueryError::UpstreamUnavailable(format!(
                    "model '{wanted}' not found on Ollama. Available: {models:?}. Run: ollama pull {wanted}"
                )));
            }
        }

        tracing::info!(
            url = %self.url,
            embedding_model = %self.embedding_model,
            generation_model = %self.generation_model,
            "Ollama connection verified"
        );
        Ok(())
    }

    async fn request_embedding(&self, request: &EmbeddingRequest<'_>) -> Result<EmbeddingResponse, QueryError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(request)
            .send()
            .await
            .map_err(|e| QueryError::UpstreamUnavailable(format!("embedding request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::UpstreamUnavailable(format!(
                "Ollama embed error: {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| QueryError::UpstreamUnavailable(format!("invalid embed response: {e}")))
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        let request = EmbeddingRequest::Single {
            model: &self.embedding_model,
            input: text,
        };
        let parsed = self.request_embedding(&request).await?;

        if let Some(embedding) = parsed.embedding {
            Ok(embedding)
        } else if let Some(embeddings) = parsed.embeddings {
            embeddings.into_iter().next().ok_or_else(|| {
                QueryError::UpstreamUnavailable("empty embeddings array from Ollama".to_string())
            })
        } else {
            Err(QueryError::UpstreamUnavailable(
                "no embedding returned from Ollama".to_string(),
            ))
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        if let Some(cached) = self.query_cache.write().await.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.embed_uncached(text).await?;
        self.query_cache
            .write()
            .await
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.len() == 1 {
            return Ok(vec![self.embed_uncached(&texts[0]).await?]);
        }

        let request = EmbeddingRequest::Batch {
            model: &self.embedding_model,
            input: texts,
        };
        let parsed = self.request_embedding(&request).await?;

        if let Some(embeddings) = parsed.embeddings {
            if embeddings.len() == texts.len() {
                return Ok(embeddings);
            }
            tracing::warn!(
                "batch embed returned {} vectors for {} texts, falling back to sequential",
                embeddings.len(),
                texts.len()
            );
        } else {
            tracing::warn!(
                "model '{}' does not support batch embeddings, falling back to sequential",
                self.embedding_model
            );
        }

        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            result.push(self.embed_uncached(text).await?);
        }
        Ok(result)
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, QueryError> {
        let request = GenerateRequest {
            model: &self.generation_model,
            prompt,
            system,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::UpstreamUnavailable(format!("generation request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::UpstreamUnavailable(format!(
                "Ollama generate error: {status} - {body}"
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            QueryError::UpstreamUnavailable(format!("invalid generate response: {e}"))
        })?;
        Ok(parsed.response.trim().to_string())
    }
}
