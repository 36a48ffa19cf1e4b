//! In-process fakes shared by the module tests. Embeddings are a
//! deterministic bag-of-words hash so token overlap drives similarity the
//! way semantic overlap does with a real model.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::QueryError;
use crate::ollama::ModelBackend;

const EMBEDDING_DIM: usize = 256;

/// FNV-1a, so embeddings are stable across runs and platforms.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Deterministic toy embedding: tokens of four or more characters hashed
/// into a fixed-dimension bag-of-words vector. Short tokens (articles,
/// "is", "the") are dropped so unrelated questions score near zero.
pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0_f32; EMBEDDING_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 4)
    {
        let bucket = (fnv1a(token) % EMBEDDING_DIM as u64) as usize;
        v[bucket] += 1.0;
    }
    v
}

/// Model backend fake: keyword embeddings plus a canned generation answer,
/// with a call counter for short-circuit assertions.
pub struct FakeBackend {
    answer: String,
    pub generate_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub fn generate_call_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for FakeBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        Ok(keyword_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        Ok(texts.iter().map(|t| keyword_embedding(t)).collect())
    }

    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String, QueryError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

/// Backend whose every call fails, for infrastructure-error propagation
/// tests.
pub struct UnreachableBackend;

#[async_trait]
impl ModelBackend for UnreachableBackend {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, QueryError> {
        Err(QueryError::UpstreamUnavailable(
            "connection refused".to_string(),
        ))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
        Err(QueryError::UpstreamUnavailable(
            "connection refused".to_string(),
        ))
    }

    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String, QueryError> {
        Err(QueryError::UpstreamUnavailable(
            "connection refused".to_string(),
        ))
    }
}
