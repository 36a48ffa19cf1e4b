use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

const INDEX_VERSION: u32 = 1;

/// A fragment of the manual with its embedding and provenance metadata.
/// Chunks are immutable once created; identity is the id.
///
/// Ids are deterministic (`<source-stem>:<page>:<ordinal>`) so re-ingesting
/// an unchanged document reproduces the same ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualChunk {
    pub id: String,
    pub text: String,
    pub chapter: String,
    pub page: usize,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// Read-only at query time, append-only during ingestion. Chunks are held
/// in document order so equal-score search results tie-break by insertion
/// order.
#[derive(Debug)]
pub struct ChunkStore {
    chunks: Vec<ManualChunk>,
    model: String,
    source: Option<String>,
    source_hash: Option<String>,
    data_dir: String,
}

#[derive(Serialize)]
struct PersistedState<'a> {
    version: u32,
    model: &'a str,
    source: &'a Option<String>,
    source_hash: &'a Option<String>,
    chunks: &'a Vec<ManualChunk>,
}

#[derive(Deserialize)]
struct LoadedState {
    version: u32,
    model: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_hash: Option<String>,
    chunks: Vec<ManualChunk>,
}

impl ChunkStore {
    pub fn new(model: &str, data_dir: &str) -> Self {
        Self {
            chunks: Vec::new(),
            model: model.to_string(),
            source: None,
            source_hash: None,
            data_dir: data_dir.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn source_hash(&self) -> Option<&str> {
        self.source_hash.as_deref()
    }

    pub fn set_source(&mut self, source: &str, hash: &str) {
        self.source = Some(source.to_string());
        self.source_hash = Some(hash.to_string());
    }

    /// Appends a chunk, normalizing its embedding so search reduces to a
    /// dot product.
    pub fn insert(&mut self, mut chunk: ManualChunk) {
        normalize(&mut chunk.embedding);
        self.chunks.push(chunk);
    }

    pub fn get(&self, id: &str) -> Option<&ManualChunk> {
        self.chunks.iter().find(|chunk| chunk.id == id)
    }

    /// Distinct chapter labels present in the index, in document order.
    pub fn chapters(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for chunk in &self.chunks {
            if !seen.contains(&chunk.chapter.as_str()) {
                seen.push(chunk.chapter.as_str());
            }
        }
        seen
    }

    /// Returns up to `k` nearest neighbors by cosine similarity, restricted
    /// to `chapter == filter` when a filter is given. Scores are clamped to
    /// `[0, 1]`; ties keep insertion order (stable sort over a `Vec` held
    /// in document order).
    pub fn search(
        &self,
        query: &[f32],
        chapter_filter: Option<&str>,
        k: usize,
    ) -> Result<Vec<(String, f32)>, QueryError> {
        if self.chunks.is_empty() {
            return Err(QueryError::StoreUnavailable(
                "index is empty; run ingestion first".to_string(),
            ));
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(String, f32)> = self
            .chunks
            .iter()
            .filter(|chunk| match chapter_filter {
                Some(filter) => chunk.chapter == filter,
                None => true,
            })
            .map(|chunk| {
                let score = dot_product(&query, &chunk.embedding).clamp(0.0, 1.0);
                (chunk.id.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn index_path(data_dir: &str, model: &str) -> PathBuf {
        PathBuf::from(data_dir).join(format!("index_{}.json", sanitize_model_name(model)))
    }

    /// Persists the index atomically (temp file + rename).
    pub async fn save(&self) -> Result<(), QueryError> {
        let final_path = Self::index_path(&self.data_dir, &self.model);
        let temp_path = final_path.with_extension("json.tmp");

        let state = PersistedState {
            version: INDEX_VERSION,
            model: &self.model,
            source: &self.source,
            source_hash: &self.source_hash,
            chunks: &self.chunks,
        };
        let data = serde_json::to_string(&state)
            .map_err(|e| QueryError::StoreUnavailable(format!("serializing index: {e}")))?;

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| QueryError::StoreUnavailable(format!("creating data dir: {e}")))?;
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| QueryError::StoreUnavailable(format!("writing index: {e}")))?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| QueryError::StoreUnavailable(format!("committing index: {e}")))?;

        tracing::info!(
            chunks = self.chunks.len(),
            path = %final_path.display(),
            "saved chunk index"
        );
        Ok(())
    }

    /// Loads the persisted index for `model`, refusing to serve an index
    /// that is missing, unreadable, of an unknown version, or built by a
    /// different embedding model.
    pub async fn load(model: &str, data_dir: &str) -> Result<Self, QueryError> {
        let path = Self::index_path(data_dir, model);
        let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
            QueryError::StoreUnavailable(format!(
                "cannot read index at {} ({e}); run `manual-qa ingest <pdf>` first",
                path.display()
            ))
        })?;

        let state: LoadedState = serde_json::from_str(&data)
            .map_err(|e| QueryError::StoreUnavailable(format!("corrupt index file: {e}")))?;

        if state.version != INDEX_VERSION {
            return Err(QueryError::StoreUnavailable(format!(
                "index version {} is not supported; re-run ingestion",
                state.version
            )));
        }
        if state.model != model {
            return Err(QueryError::StoreUnavailable(format!(
                "index was built with embedding model '{}' but '{model}' is configured",
                state.model
            )));
        }

        let mut store = Self {
            chunks: Vec::with_capacity(state.chunks.len()),
            model: state.model,
            source: state.source,
            source_hash: state.source_hash,
            data_dir: data_dir.to_string(),
        };
        // Re-normalize on load in case the file predates normalized storage.
        for chunk in state.chunks {
            store.insert(chunk);
        }

        tracing::info!(
            chunks = store.chunks.len(),
            path = %path.display(),
            "loaded chunk index"
        );
        Ok(store)
    }
}

/// Normalize a vector to unit length in-place. Vectors with near-zero norm
/// are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 1e-20 {
        let norm = norm_sq.sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product; equals cosine similarity for normalized vectors.
#[inline(always)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Sanitizes a model name for safe use as part of a filename.
fn sanitize_model_name(model: &str) -> String {
    let sanitized: String = model
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '_' || c == '.') {
        "default".to_string()
    } else {
        sanitized
    }
}
