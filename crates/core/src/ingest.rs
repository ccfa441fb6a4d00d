use crate::chunking::{chunk_documents, ChunkingConfig};
use crate::loader::{SkippedPage, WebPageLoader};
use crate::models::{Document, IngestionOptions};
use crate::traits::{Embedder, VectorIndex};
use crate::IngestError;
use tracing::{debug, info};

#[derive(Debug)]
pub struct IndexingReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped_pages: Vec<SkippedPage>,
}

/// Loads website pages, chunks them and pushes the embedded chunks into the
/// vector index.
pub struct WebsiteIndexer<E, V> {
    loader: WebPageLoader,
    embedder: E,
    index: V,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl<E, V> WebsiteIndexer<E, V>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(
        loader: WebPageLoader,
        embedder: E,
        index: V,
        options: &IngestionOptions,
    ) -> Result<Self, IngestError> {
        let chunking = ChunkingConfig::from(options);
        chunking.validate()?;

        Ok(Self {
            loader,
            embedder,
            index,
            chunking,
            batch_size: options.embedding_batch_size.max(1),
        })
    }

    pub async fn index_pages(&self, urls: &[String]) -> Result<IndexingReport, IngestError> {
        let loaded = self.loader.load(urls).await?;
        let mut report = self.index_documents(&loaded.documents).await?;
        report.skipped_pages = loaded.skipped_pages;
        Ok(report)
    }

    /// Chunks, embeds and upserts already loaded documents, one embedding
    /// batch at a time.
    pub async fn index_documents(
        &self,
        documents: &[Document],
    ) -> Result<IndexingReport, IngestError> {
        let chunks = chunk_documents(documents, &self.chunking)?;

        for (batch_number, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts = batch
                .iter()
                .map(|chunk| chunk.text.clone())
                .collect::<Vec<_>>();
            let embeddings = self.embedder.embed(&texts).await?;
            self.index.upsert_chunks(batch, &embeddings).await?;
            debug!(batch = batch_number, size = batch.len(), "upserted chunk batch");
        }

        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "indexing complete"
        );

        Ok(IndexingReport {
            documents: documents.len(),
            chunks: chunks.len(),
            skipped_pages: Vec::new(),
        })
    }
}
