use crate::models::{Chunk, FormattedAnswer, SamplingParameters, ScoredChunk};
use crate::{QaError, UpstreamServiceError};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Embedder {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamServiceError>;
}

#[async_trait]
pub trait VectorIndex {
    async fn upsert_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), UpstreamServiceError>;

    /// Nearest neighbours of `query_vector`, best first, at most `top_k`,
    /// none scoring below `distance_threshold`.
    async fn find_neighbors(
        &self,
        query_vector: &[f32],
        top_k: usize,
        distance_threshold: f64,
    ) -> Result<Vec<ScoredChunk>, UpstreamServiceError>;
}

#[async_trait]
pub trait TextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        parameters: &SamplingParameters,
    ) -> Result<String, UpstreamServiceError>;
}

#[async_trait]
pub trait QuestionAnswering {
    async fn answer(&self, question: &str) -> Result<FormattedAnswer, QaError>;
}

#[async_trait]
impl<T> Embedder for Arc<T>
where
    T: Embedder + Send + Sync + ?Sized,
{
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamServiceError> {
        (**self).embed(texts).await
    }
}

#[async_trait]
impl<T> VectorIndex for Arc<T>
where
    T: VectorIndex + Send + Sync + ?Sized,
{
    async fn upsert_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), UpstreamServiceError> {
        (**self).upsert_chunks(chunks, embeddings).await
    }

    async fn find_neighbors(
        &self,
        query_vector: &[f32],
        top_k: usize,
        distance_threshold: f64,
    ) -> Result<Vec<ScoredChunk>, UpstreamServiceError> {
        (**self)
            .find_neighbors(query_vector, top_k, distance_threshold)
            .await
    }
}

#[async_trait]
impl<T> TextGenerator for Arc<T>
where
    T: TextGenerator + Send + Sync + ?Sized,
{
    async fn generate(
        &self,
        prompt: &str,
        parameters: &SamplingParameters,
    ) -> Result<String, UpstreamServiceError> {
        (**self).generate(prompt, parameters).await
    }
}
