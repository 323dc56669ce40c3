pub mod models;
pub mod pool;
pub mod repository;
pub mod vector_store;

pub use models::*;
pub use pool::DbPool;
pub use repository::Repository;
pub use vector_store::{
    smart_filter_and_rank, ScoredChunk, SearchFilter, VectorPoint, VectorStore,
    MAX_CHUNKS_FOR_VECTOR_STORE,
};
