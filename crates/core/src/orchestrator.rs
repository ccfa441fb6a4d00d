use crate::formatter::AnswerFormatter;
use crate::models::{FormattedAnswer, QaResult, RetrievalOptions, SamplingParameters};
use crate::retriever::Retriever;
use crate::synthesizer::{stuff_context, AnswerSynthesizer};
use crate::traits::{Embedder, QuestionAnswering, TextGenerator, VectorIndex};
use crate::QaError;
use async_trait::async_trait;
use tracing::info;

/// Retrieve, synthesize, format. One instance serves every request.
pub struct QaCoordinator<E, V, G> {
    retriever: Retriever<E, V>,
    synthesizer: AnswerSynthesizer<G>,
    formatter: AnswerFormatter<G>,
}

impl<E, V, G> QaCoordinator<E, V, G>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Clone + Send + Sync,
{
    pub fn new(
        embedder: E,
        index: V,
        generator: G,
        retrieval: RetrievalOptions,
        sampling: SamplingParameters,
    ) -> Self {
        Self {
            retriever: Retriever::new(embedder, index, retrieval),
            synthesizer: AnswerSynthesizer::new(generator.clone(), sampling),
            formatter: AnswerFormatter::new(generator, sampling),
        }
    }

    /// The raw answer with the chunks it was grounded on, before display
    /// formatting.
    pub async fn ask(&self, question: &str) -> Result<QaResult, QaError> {
        let hits = self.retriever.retrieve(question).await?;
        let context = stuff_context(&hits);
        let answer = self.synthesizer.synthesize(question, &context).await?;

        Ok(QaResult {
            query: question.to_string(),
            answer,
            source_chunks: hits,
        })
    }
}

#[async_trait]
impl<E, V, G> QuestionAnswering for QaCoordinator<E, V, G>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Clone + Send + Sync,
{
    async fn answer(&self, question: &str) -> Result<FormattedAnswer, QaError> {
        let result = self.ask(question).await?;
        let formatted = self.formatter.format(&result).await?;

        info!(
            query = %result.query,
            hits = result.source_chunks.len(),
            references = formatted.references.len(),
            "answered question"
        );
        Ok(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::references_json;
    use crate::models::{Chunk, ScoredChunk};
    use crate::{BadRequestError, UpstreamServiceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamServiceError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<ScoredChunk>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn upsert_chunks(
            &self,
            _chunks: &[Chunk],
            _embeddings: &[Vec<f32>],
        ) -> Result<(), UpstreamServiceError> {
            Ok(())
        }

        async fn find_neighbors(
            &self,
            _query_vector: &[f32],
            top_k: usize,
            distance_threshold: f64,
        ) -> Result<Vec<ScoredChunk>, UpstreamServiceError> {
            Ok(self
                .hits
                .iter()
                .filter(|hit| hit.score >= distance_threshold)
                .take(top_k)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _parameters: &SamplingParameters,
        ) -> Result<String, UpstreamServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(UpstreamServiceError::backend_response("vertex-text", 503, "busy"));
            }
            if prompt.contains("reformat it") {
                Ok("NEFT is a nationwide electronic funds transfer system.".to_string())
            } else {
                Ok("NEFT stands for National Electronic Funds Transfer".to_string())
            }
        }
    }

    fn hit(source: &str, score: f64, text: &str) -> ScoredChunk {
        ScoredChunk {
            score,
            chunk: Chunk {
                chunk_id: format!("id-{source}"),
                source: source.to_string(),
                title: Some("Cymbal Bank".to_string()),
                chunk_index: 0,
                overlap_chars: 0,
                text: text.to_string(),
            },
        }
    }

    fn coordinator(
        hits: Vec<ScoredChunk>,
        generator: Arc<FakeGenerator>,
    ) -> QaCoordinator<FakeEmbedder, FakeIndex, Arc<FakeGenerator>> {
        QaCoordinator::new(
            FakeEmbedder,
            FakeIndex { hits },
            generator,
            RetrievalOptions::default(),
            SamplingParameters::default(),
        )
    }

    #[tokio::test]
    async fn answers_with_one_reference_per_distinct_page() {
        let generator = Arc::new(FakeGenerator::default());
        let coordinator = coordinator(
            vec![
                hit("https://cymbal.example/neft", 0.92, "NEFT transfers settle in batches."),
                hit("https://cymbal.example/rtgs", 0.81, "RTGS and NEFT compared."),
                hit("https://cymbal.example/fees", 0.66, "NEFT online transfers are free."),
                hit("https://cymbal.example/loans", 0.41, "Home loans."),
            ],
            generator.clone(),
        );

        let formatted = coordinator.answer("What is NEFT?").await.unwrap();

        assert_eq!(
            formatted.answer,
            "NEFT is a nationwide electronic funds transfer system."
        );
        assert_eq!(formatted.references.len(), 3);
        assert!(formatted.references.iter().all(|reference| reference.id.is_none()));
        assert!(!references_json(&formatted.references).unwrap().contains("\"id\""));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_hits_means_fallback_without_model_calls() {
        let generator = Arc::new(FakeGenerator::default());
        let coordinator = coordinator(Vec::new(), generator.clone());

        let formatted = coordinator
            .answer("Why should I choose Cymbal Bank?")
            .await
            .unwrap();

        assert_eq!(formatted.answer, "I do not know the answer to that.");
        assert!(formatted.references.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_failure_is_an_upstream_error() {
        let generator = Arc::new(FakeGenerator {
            fail: true,
            ..FakeGenerator::default()
        });
        let coordinator = coordinator(
            vec![hit("https://cymbal.example/neft", 0.9, "NEFT")],
            generator,
        );

        let error = coordinator.answer("What is NEFT?").await.unwrap_err();
        assert!(matches!(error, QaError::Upstream(_)));
    }

    #[tokio::test]
    async fn blank_question_is_a_bad_request() {
        let coordinator = coordinator(Vec::new(), Arc::new(FakeGenerator::default()));

        let error = coordinator.ask("   ").await.unwrap_err();
        assert!(matches!(error, QaError::BadRequest(BadRequestError::EmptyQuery)));
    }
}
