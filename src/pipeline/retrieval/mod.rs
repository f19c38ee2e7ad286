//! Similar-case retrieval: embed a reference corpus once, then rank it
//! against the embedding of each analysis' findings.

pub mod builder;
pub mod corpus;
pub mod embedder;
pub mod index;

pub use builder::{BuildOutcome, IndexBuilder};
pub use corpus::{embed_corpus, load_records, query_text, CorpusSource};
pub use embedder::{EmbeddingModel, MockEmbedder, EMBEDDING_DIM};
pub use index::{similarity_from_distance, RetrievalIndex};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Retrieval index has not been built")]
    NotReady,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Query has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corpus case {case_id} has dimension {actual}, expected {expected}")]
    InconsistentDimension {
        case_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Reference corpus contains no usable reports")]
    EmptyCorpus,

    #[error("Cannot read corpus {path}: {source}")]
    CorpusIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corpus parse error: {0}")]
    CorpusParse(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding model load failed: {0}")]
    ModelLoad(String),
}
