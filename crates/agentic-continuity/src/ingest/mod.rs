//! Batch ingestion — resumable, de-duplicated import of external message
//! corpora with embeddings.

pub mod embedding;
pub mod pipeline;
pub mod types;

pub use embedding::{embed_parallel, EmbeddingProvider, HashingEmbedder};
pub use pipeline::{IngestPipeline, INGEST_ACTOR};
pub use types::{
    CancellationToken, CheckpointStatus, ImportBatch, ImportCheckpoint, ImportVerification,
    ImportedMessage, IngestMessage, IngestReport,
};
