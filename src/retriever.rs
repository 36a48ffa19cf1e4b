use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::chapters::ChapterCatalog;
use crate::error::QueryError;
use crate::ollama::ModelBackend;
use crate::store::ChunkStore;

/// A chunk that survived retrieval, carried through to answer assembly and
/// returned to the caller as a source.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMatch {
    pub chunk_id: String,
    pub text: String,
    pub chapter: String,
    pub page: usize,
    pub similarity_score: f32,
}

/// Output of one retrieval pass.
#[derive(Debug)]
pub struct Retrieval {
    /// Surviving matches, ordered by descending similarity.
    pub matches: Vec<RetrievedMatch>,
    /// The chapter filter the returned matches were actually found under;
    /// `None` when guessing failed or the filtered search fell back.
    pub applied_filter: Option<String>,
    pub elapsed_ms: f64,
}

/// Milliseconds elapsed since `started`, as a float.
pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Chapter-aware nearest-neighbor retrieval with an unfiltered fallback.
pub struct HybridRetriever {
    backend: Arc<dyn ModelBackend>,
    store: Arc<ChunkStore>,
    catalog: Arc<ChapterCatalog>,
    min_similarity: f32,
    top_k: usize,
}

impl HybridRetriever {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        store: Arc<ChunkStore>,
        catalog: Arc<ChapterCatalog>,
        min_similarity: f32,
        top_k: usize,
    ) -> Self {
        Self {
            backend,
            store,
            catalog,
            min_similarity,
            top_k,
        }
    }

    /// Embeds the question, narrows the search to the guessed chapter, and
    /// retries across the whole corpus when the filtered search comes back
    /// empty -- a wrong chapter guess must never turn an answerable
    /// question into "don't know".
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval, QueryError> {
        let started = Instant::now();

        let query_embedding = self.backend.embed(question).await?;
        let guessed = self.catalog.guess(question);

        let mut applied_filter = guessed.map(|c| c.to_string());
        let mut hits = self
            .store
            .search(&query_embedding, guessed, self.top_k)?;

        if hits.is_empty() && guessed.is_some() {
            tracing::debug!(
                chapter = guessed.unwrap_or_default(),
                "chapter-filtered search was empty, retrying unfiltered"
            );
            hits = self.store.search(&query_embedding, None, self.top_k)?;
            applied_filter = None;
        }

        let matches: Vec<RetrievedMatch> = hits
            .into_iter()
            .filter(|(_, score)| *score >= self.min_similarity)
            .filter_map(|(id, score)| {
                self.store.get(&id).map(|chunk| RetrievedMatch {
                    chunk_id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    chapter: chunk.chapter.clone(),
                    page: chunk.page,
                    similarity_score: score,
                })
            })
            .collect();

        Ok(Retrieval {
            matches,
            applied_filter,
            elapsed_ms: elapsed_ms(started),
        })
    }
}
