use serde::{Serialize, Serializer};

use crate::error::QueryError;
use crate::generator::AnswerGenerator;
use crate::retriever::{HybridRetriever, RetrievedMatch};

/// Response payload for one answered question. Constructed and returned
/// within a single request; never persisted.
#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub answer: String,
    /// Surviving sources, ordered by descending similarity.
    pub sources: Vec<RetrievedMatch>,
    #[serde(serialize_with = "round_one_decimal")]
    pub retrieval_latency_ms: f64,
    #[serde(serialize_with = "round_one_decimal")]
    pub generation_latency_ms: f64,
    pub applied_chapter_filter: Option<String>,
}

/// Latencies go over the wire in milliseconds to one decimal place.
fn round_one_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 10.0).round() / 10.0)
}

/// Sequences retrieval and generation and assembles the response payload.
pub struct QueryEngine {
    retriever: HybridRetriever,
    generator: AnswerGenerator,
}

impl QueryEngine {
    pub fn new(retriever: HybridRetriever, generator: AnswerGenerator) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Answers one question. Infrastructure failures propagate as
    /// [`QueryError`]; an unanswerable question is a successful result
    /// carrying the fallback sentence.
    pub async fn answer_question(&self, question: &str) -> Result<QueryResult, QueryError> {
        let retrieval = self.retriever.retrieve(question).await?;
        let (answer, generation_latency_ms) = self
            .generator
            .generate(question, &retrieval.matches)
            .await?;

        let sources_summary: Vec<String> = retrieval
            .matches
            .iter()
            .map(|m| format!("{}/p{}/{:.3}", m.chapter, m.page, m.similarity_score))
            .collect();
        tracing::info!(
            question,
            applied_chapter_filter = retrieval.applied_filter.as_deref().unwrap_or("none"),
            retrieval_latency_ms = retrieval.elapsed_ms,
            generation_latency_ms,
            sources = ?sources_summary,
            "answered question"
        );

        Ok(QueryResult {
            answer,
            sources: retrieval.matches,
            retrieval_latency_ms: retrieval.elapsed_ms,
            generation_latency_ms,
            applied_chapter_filter: retrieval.applied_filter,
        })
    }
}
