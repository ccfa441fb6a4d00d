pub mod chunking;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod formatter;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod synthesizer;
pub mod tenure;
pub mod traits;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use chunking::{chunk_documents, split_text, ChunkingConfig, TextChunk};
pub use client::{AccessTokenSource, GoogleApiClient, RetryPolicy};
pub use config::{HttpConfig, IndexConfig, ServiceConfig, VectorSearchConfig, VertexConfig};
pub use embeddings::{VertexEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{BadRequestError, IngestError, QaError, UpstreamServiceError};
pub use formatter::{dedup_references, wrap, AnswerFormatter};
pub use generation::VertexTextModel;
pub use ingest::{IndexingReport, WebsiteIndexer};
pub use loader::{HtmlExtractor, LoadReport, SkippedPage, WebPageLoader};
pub use models::{
    Chunk, Document, FormattedAnswer, IngestionOptions, QaResult, RetrievalOptions,
    RetrievedReference, SamplingParameters, ScoredChunk, CYMBAL_BANK_PAGES, DEFAULT_QUESTION,
};
pub use orchestrator::QaCoordinator;
pub use retriever::Retriever;
pub use stores::{DeployedIndex, QdrantStore, VectorSearchStore};
pub use synthesizer::AnswerSynthesizer;
pub use tenure::number_of_days;
pub use traits::{Embedder, QuestionAnswering, TextGenerator, VectorIndex};
pub use webhook::{resolve_query, QaEnvelope, TenureEnvelope};
