use crate::models::{RetrievalOptions, ScoredChunk};
use crate::traits::{Embedder, VectorIndex};
use crate::{BadRequestError, QaError, UpstreamServiceError};
use tracing::debug;

/// Embeds a query and asks the index for its nearest chunks.
///
/// Relevance is entirely the index's business: hits come back in the
/// order the index ranked them and the threshold is only passed through.
pub struct Retriever<E, V> {
    embedder: E,
    index: V,
    options: RetrievalOptions,
}

impl<E, V> Retriever<E, V>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(embedder: E, index: V, options: RetrievalOptions) -> Self {
        Self {
            embedder,
            index,
            options,
        }
    }

    pub fn options(&self) -> RetrievalOptions {
        self.options
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, QaError> {
        if query.trim().is_empty() {
            return Err(BadRequestError::EmptyQuery.into());
        }

        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| {
            UpstreamServiceError::malformed("embeddings", "no vector returned for the query")
        })?;

        let mut hits = self
            .index
            .find_neighbors(
                &query_vector,
                self.options.top_k,
                self.options.distance_threshold,
            )
            .await?;
        hits.truncate(self.options.top_k);

        debug!(
            hits = hits.len(),
            top_k = self.options.top_k,
            threshold = self.options.distance_threshold,
            "retrieved chunks"
        );
        Ok(hits)
    }
}
