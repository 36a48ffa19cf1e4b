use thiserror::Error;

/// Failure taxonomy for the query path.
///
/// Content insufficiency ("no relevant excerpt found") is deliberately not
/// represented here: it is a normal outcome that produces the fallback
/// answer, never an error.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The persisted chunk index is missing, corrupt, or was built by a
    /// different embedding model. Fatal at startup.
    #[error("chunk store unavailable: {0}")]
    StoreUnavailable(String),

    /// The model server could not be reached or timed out.
    #[error("model backend unavailable: {0}")]
    UpstreamUnavailable(String),
}
