use std::sync::Arc;
use std::time::Instant;

use crate::error::QueryError;
use crate::ollama::ModelBackend;
use crate::retriever::{RetrievedMatch, elapsed_ms};

/// The exact sentence returned when the manual does not contain an answer.
pub const FALLBACK_ANSWER: &str = "I don't know based on the manual.";

const SYSTEM_INSTRUCTION: &str = "You answer questions about a vehicle using only the supplied \
excerpts from its owner's manual. Do not use any other knowledge. If the excerpts do not \
contain the answer, reply with exactly: I don't know based on the manual.";

/// Confidence-gated answer generation over the retrieved context.
pub struct AnswerGenerator {
    backend: Arc<dyn ModelBackend>,
}

impl AnswerGenerator {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    /// Generates an answer grounded in `context`.
    ///
    /// An empty context short-circuits to the fallback sentence without
    /// calling the model: deciding "there is nothing to answer from" is the
    /// pipeline's job, not the model's.
    pub async fn generate(
        &self,
        question: &str,
        context: &[RetrievedMatch],
    ) -> Result<(String, f64), QueryError> {
        let started = Instant::now();

        if context.is_empty() {
            return Ok((FALLBACK_ANSWER.to_string(), elapsed_ms(started)));
        }

        let prompt = build_prompt(question, context);
        let answer = self.backend.generate(SYSTEM_INSTRUCTION, &prompt).await?;
        let answer = if answer.trim().is_empty() {
            FALLBACK_ANSWER.to_string()
        } else {
            answer
        };

        Ok((answer, elapsed_ms(started)))
    }
}

/// Concatenates each match's text, labelled with its chapter and page,
/// followed by the question.
fn build_prompt(question: &str, context: &[RetrievedMatch]) -> String {
    let mut prompt = String::from("Manual excerpts:\n\n");
    for m in context {
        prompt.push_str(&format!(
            "[{}, page {}]\n{}\n\n",
            m.chapter, m.page, m.text
        ));
    }
    prompt.push_str(&format!("Question: {question}\n"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;

    fn matched(chapter: &str, page: usize, text: &str) -> RetrievedMatch {
        RetrievedMatch {
            chunk_id: format!("{chapter}:{page}"),
            text: text.to_string(),
            chapter: chapter.to_string(),
            page,
            similarity_score: 0.8,
        }
    }

    #[tokio::test]
    async fn empty_context_short_circuits_without_model_call() {
        let backend = Arc::new(FakeBackend::new("should never be returned"));
        let generator = AnswerGenerator::new(backend.clone());

        let (answer, elapsed) = generator
            .generate("How do I open the tailgate?", &[])
            .await
            .expect("generate");

        assert_eq!(answer, FALLBACK_ANSWER);
        assert_eq!(
            backend.generate_call_count(),
            0,
            "the model must not be called when there is no context"
        );
        assert!(elapsed >= 0.0);
    }

    #[tokio::test]
    async fn non_empty_context_calls_model_once() {
        let backend = Arc::new(FakeBackend::new("Press the release button."));
        let generator = AnswerGenerator::new(backend.clone());
        let context = vec![matched(
            "Getting in",
            52,
            "Press the tailgate release button.",
        )];

        let (answer, _) = generator
            .generate("How do I open the tailgate?", &context)
            .await
            .expect("generate");

        assert_eq!(answer, "Press the release button.");
        assert_eq!(backend.generate_call_count(), 1);
    }

    #[tokio::test]
    async fn blank_model_output_becomes_fallback() {
        let backend = Arc::new(FakeBackend::new("   "));
        let generator = AnswerGenerator::new(backend.clone());
        let context = vec![matched("Lights", 80, "Turn the ring for main beam.")];

        let (answer, _) = generator
            .generate("How do the lights work?", &context)
            .await
            .expect("generate");
        assert_eq!(answer, FALLBACK_ANSWER);
    }

    #[test]
    fn prompt_labels_excerpts_with_chapter_and_page() {
        let context = vec![
            matched("Getting in", 52, "Press the tailgate release button."),
            matched("Lights", 80, "Turn the ring for main beam."),
        ];
        let prompt = build_prompt("How do I open the tailgate?", &context);

        assert!(prompt.contains("[Getting in, page 52]"));
        assert!(prompt.contains("[Lights, page 80]"));
        assert!(prompt.contains("Press the tailgate release button."));
        assert!(
            prompt.ends_with("Question: How do I open the tailgate?\n"),
            "question comes after the excerpts"
        );
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        use crate::error::QueryError;
        use crate::test_support::UnreachableBackend;

        let generator = AnswerGenerator::new(Arc::new(UnreachableBackend));
        let context = vec![matched("Lights", 80, "Turn the ring for main beam.")];
        let err = generator
            .generate("How do the lights work?", &context)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UpstreamUnavailable(_)));
    }
}
