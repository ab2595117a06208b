// src/ingest/types.rs
use serde::{Deserialize, Serialize};

/// One social message, normalized to the common shape all adapters emit.
///
/// `(adapter, source_id)` is globally unique and is the deduplication key
/// downstream. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub adapter: String,   // origin tag, e.g. "x", "telegram"
    pub source_id: String, // unique within its adapter
    pub timestamp: u64,    // unix seconds, UTC
    pub text: String,      // raw content (normalized later in the pipeline)
    pub author_id: String, // opaque
}

/// A `Post` with its sentiment score attached. Consumed once by the
/// aggregator; only its contribution to a bucket persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPost {
    pub post: Post,
    /// Bounded scalar in [-1, 1].
    pub score: f64,
    pub scored_at: u64,
}

/// Per-adapter fetch cursor. `last_seen_ts` is the high-water timestamp;
/// `token` is an adapter-opaque continuation (since_id, long-poll offset).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub last_seen_ts: u64,
    pub token: Option<String>,
}

/// Result of one `fetch_since` call: posts in non-decreasing timestamp
/// order plus the cursor to resume from. An empty batch returns the
/// cursor unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    pub posts: Vec<Post>,
    pub next_cursor: Cursor,
}

impl FetchBatch {
    pub fn empty(cursor: Cursor) -> Self {
        Self {
            posts: Vec::new(),
            next_cursor: cursor,
        }
    }
}

/// Fetch failures. Everything a provider can hit at runtime (network,
/// auth, rate limit, malformed payload) is retryable from the pipeline's
/// point of view: back off, refetch, never advance the checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch posts strictly after `cursor`, oldest first.
    async fn fetch_since(&self, cursor: &Cursor) -> Result<FetchBatch, SourceError>;
    fn name(&self) -> &'static str;
}
