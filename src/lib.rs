// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod export;
pub mod ingest;
pub mod metrics;
pub mod sentiment;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{Aggregator, AggregatorCfg, FinalizedBucket, IngestOutcome};
pub use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use crate::config::PipelineConfig;
pub use crate::export::{BucketSink, CsvBucketSink};
pub use crate::ingest::pipeline::{FlushWorker, PipelineWorker, WorkerCfg};
pub use crate::ingest::types::{Cursor, FetchBatch, Post, ScoredPost, SourceAdapter, SourceError};
pub use crate::sentiment::{LexiconScorer, SentimentLabel, SentimentScorer};
