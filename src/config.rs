use std::time::Duration;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration, read from the environment exactly once at startup
/// and passed by reference into each component's constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Ollama server serving both models.
    pub ollama_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// Directory holding the persisted chunk index.
    pub data_dir: String,
    /// Target chunk length in characters.
    pub chunk_chars: usize,
    /// Characters of trailing context carried into the next chunk.
    pub chunk_overlap: usize,
    /// Minimum similarity score for a retrieved chunk to survive.
    pub min_similarity: f32,
    /// Number of nearest neighbors requested per search.
    pub top_k: usize,
    /// Chunks embedded per Ollama batch request during ingestion.
    pub embed_batch_size: usize,
    /// Bind address for the HTTP server.
    pub http_bind: String,
    /// Per-request timeout for the Ollama client.
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ollama_url: env_string("OLLAMA_URL", "http://localhost:11434"),
            embedding_model: env_string("EMBEDDING_MODEL", "nomic-embed-text"),
            generation_model: env_string("GENERATION_MODEL", "llama3.2"),
            data_dir: env_string("DATA_DIR", "./data"),
            chunk_chars: env_parse("CHUNK_CHARS", 800),
            chunk_overlap: env_parse("CHUNK_OVERLAP", 200),
            min_similarity: env_parse("MIN_SIMILARITY", 0.35_f32),
            top_k: env_parse("TOP_K", 4),
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", 32),
            http_bind: env_string("HTTP_BIND", "127.0.0.1:3049"),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 120)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            generation_model: "llama3.2".to_string(),
            data_dir: "./data".to_string(),
            chunk_chars: 800,
            chunk_overlap: 200,
            min_similarity: 0.35,
            top_k: 4,
            embed_batch_size: 32,
            http_bind: "127.0.0.1:3049".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}
