pub mod qdrant;
pub mod vector_search;

pub use qdrant::QdrantStore;
pub use vector_search::{DeployedIndex, VectorSearchStore};
