// tests/pipeline_e2e.rs
// Full cycle against scripted adapters: fetch → normalize → score →
// aggregate → checkpoint, then flush into a memory sink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use btc_sentiment_pipeline::aggregate::{Aggregator, AggregatorCfg};
use btc_sentiment_pipeline::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use btc_sentiment_pipeline::export::MemorySink;
use btc_sentiment_pipeline::ingest::pipeline::{now_unix, FlushWorker, PipelineWorker, WorkerCfg};
use btc_sentiment_pipeline::ingest::types::{
    Cursor, FetchBatch, Post, SourceAdapter, SourceError,
};
use btc_sentiment_pipeline::sentiment::SentimentScorer;

fn worker_cfg() -> WorkerCfg {
    WorkerCfg {
        poll_interval: std::time::Duration::from_secs(60),
        fetch_timeout: std::time::Duration::from_secs(5),
        backoff_base: std::time::Duration::from_secs(1),
        backoff_cap: std::time::Duration::from_secs(60),
    }
}

fn agg() -> Arc<Aggregator> {
    Arc::new(Aggregator::new(AggregatorCfg {
        window_size_secs: 3600,
        late_arrival_tolerance_secs: 1800,
    }))
}

/// Scores a post by parsing its text as a float; unparsable text is 0.
struct ParseScorer;

impl SentimentScorer for ParseScorer {
    fn score(&self, text: &str) -> f64 {
        text.parse::<f64>().unwrap_or(0.0)
    }
}

struct ScriptedAdapter {
    batches: Mutex<VecDeque<Result<FetchBatch, ()>>>,
    calls: Arc<Mutex<Vec<Cursor>>>,
}

impl ScriptedAdapter {
    fn new(batches: Vec<Result<FetchBatch, ()>>, calls: Arc<Mutex<Vec<Cursor>>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            calls,
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch_since(&self, cursor: &Cursor) -> Result<FetchBatch, SourceError> {
        self.calls.lock().unwrap().push(cursor.clone());
        match self.batches.lock().unwrap().pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(())) => Err(SourceError::Unavailable(anyhow!("scripted outage"))),
            None => Ok(FetchBatch::empty(cursor.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn post(id: &str, ts: u64, text: &str) -> Post {
    Post {
        adapter: "mock".into(),
        source_id: id.into(),
        timestamp: ts,
        text: text.into(),
        author_id: "a".into(),
    }
}

#[tokio::test]
async fn cycle_scores_aggregates_and_checkpoints() {
    let now = now_unix();
    let batch = FetchBatch {
        posts: vec![
            post("1", now - 10, "0.5"),
            post("2", now - 9, "-0.5"),
            post("3", now - 8, "<b></b>"), // normalizes to empty → filtered
        ],
        next_cursor: Cursor {
            last_seen_ts: now - 8,
            token: Some("3".into()),
        },
    };

    let calls = Arc::new(Mutex::new(Vec::new()));
    let adapter = ScriptedAdapter::new(vec![Ok(batch)], calls.clone());
    let aggregator = agg();
    let checkpoints: Arc<MemoryCheckpointStore> = Arc::new(MemoryCheckpointStore::new());

    let mut worker = PipelineWorker::resume(
        Box::new(adapter),
        Arc::new(ParseScorer),
        aggregator.clone(),
        checkpoints.clone(),
        worker_cfg(),
    )
    .await
    .unwrap();

    let stats = worker.run_cycle().await.unwrap();
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.scored, 2);
    assert_eq!(stats.recorded, 2);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(stats.stale, 0);

    // First fetch started from the default cursor; the commit advanced it.
    assert_eq!(calls.lock().unwrap()[0], Cursor::default());
    assert_eq!(worker.cursor().token.as_deref(), Some("3"));
    let cp = checkpoints.load("mock").await.unwrap().expect("checkpoint written");
    assert_eq!(cp.cursor.token.as_deref(), Some("3"));

    // Drain into the sink: one bucket, two posts, mean zero.
    let sink = Arc::new(MemorySink::new());
    let mut flush = FlushWorker::new(aggregator.clone(), sink.clone());
    let horizon = now + 3600 + 1800 + 1;
    let written = flush.flush_once(horizon).await.unwrap();
    assert_eq!(written, 1);

    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].post_count, 2);
    assert!(rows[0].mean.abs() < 1e-12);
}

#[tokio::test]
async fn redelivered_batch_is_not_double_counted() {
    let now = now_unix();
    let posts = vec![post("1", now - 20, "0.5"), post("2", now - 15, "0.5")];
    let cursor = Cursor {
        last_seen_ts: now - 15,
        token: Some("2".into()),
    };
    // The same batch delivered twice (at-least-once redelivery).
    let batches = vec![
        Ok(FetchBatch {
            posts: posts.clone(),
            next_cursor: cursor.clone(),
        }),
        Ok(FetchBatch {
            posts,
            next_cursor: cursor,
        }),
    ];

    let calls = Arc::new(Mutex::new(Vec::new()));
    let adapter = ScriptedAdapter::new(batches, calls);
    let aggregator = agg();

    let mut worker = PipelineWorker::resume(
        Box::new(adapter),
        Arc::new(ParseScorer),
        aggregator.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        worker_cfg(),
    )
    .await
    .unwrap();

    let first = worker.run_cycle().await.unwrap();
    assert_eq!(first.recorded, 2);

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.recorded, 0);
    assert_eq!(second.duplicates, 2);

    let rows = aggregator.flush(now + 3600 + 1800 + 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].post_count, 2);
}

#[tokio::test]
async fn empty_batch_leaves_cursor_unchanged() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let adapter = ScriptedAdapter::new(Vec::new(), calls);
    let aggregator = agg();

    let mut worker = PipelineWorker::resume(
        Box::new(adapter),
        Arc::new(ParseScorer),
        aggregator,
        Arc::new(MemoryCheckpointStore::new()),
        worker_cfg(),
    )
    .await
    .unwrap();

    let stats = worker.run_cycle().await.unwrap();
    assert_eq!(stats.fetched, 0);
    assert_eq!(worker.cursor(), &Cursor::default());
}
