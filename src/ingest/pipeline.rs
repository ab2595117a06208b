//! # Ingest Pipeline
//! One worker per adapter: IDLE → FETCHING → SCORING → AGGREGATING →
//! CHECKPOINTING → IDLE, with exponential backoff on fetch failures.
//! The checkpoint write is the commit point; nothing before it is
//! durable, and re-delivered posts are absorbed by the aggregator's
//! deduplication (at-least-once toward the aggregator).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use tokio::time::MissedTickBehavior;

use crate::aggregate::{Aggregator, FinalizedBucket, IngestOutcome};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::export::BucketSink;
use crate::ingest::types::{Cursor, ScoredPost, SourceAdapter, SourceError};
use crate::ingest::{ensure_metrics_described, normalize_text};
use crate::sentiment::SentimentScorer;

/// Worker states, also used as the `state` field on tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Scoring,
    Aggregating,
    Checkpointing,
    Backoff,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Scoring => "scoring",
            Self::Aggregating => "aggregating",
            Self::Checkpointing => "checkpointing",
            Self::Backoff => "backoff",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerCfg {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl WorkerCfg {
    pub fn from_config(cfg: &crate::config::PipelineConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            fetch_timeout: Duration::from_secs(cfg.fetch_timeout_secs),
            backoff_base: Duration::from_secs(cfg.backoff_base_secs),
            backoff_cap: Duration::from_secs(cfg.backoff_cap_secs),
        }
    }
}

/// Per-cycle accounting, logged each tick and returned for tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub fetched: usize,
    pub filtered: usize,
    pub scored: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub stale: usize,
}

pub struct PipelineWorker {
    adapter: Box<dyn SourceAdapter>,
    scorer: Arc<dyn SentimentScorer>,
    aggregator: Arc<Aggregator>,
    checkpoints: Arc<dyn CheckpointStore>,
    cfg: WorkerCfg,
    cursor: Cursor,
    state: WorkerState,
    consecutive_failures: u32,
}

impl PipelineWorker {
    /// Build a worker, resuming from the adapter's persisted checkpoint
    /// when one exists.
    pub async fn resume(
        adapter: Box<dyn SourceAdapter>,
        scorer: Arc<dyn SentimentScorer>,
        aggregator: Arc<Aggregator>,
        checkpoints: Arc<dyn CheckpointStore>,
        cfg: WorkerCfg,
    ) -> Result<Self> {
        ensure_metrics_described();
        let cursor = checkpoints
            .load(adapter.name())
            .await?
            .map(|cp| cp.cursor)
            .unwrap_or_default();
        Ok(Self {
            adapter,
            scorer,
            aggregator,
            checkpoints,
            cfg,
            cursor,
            state: WorkerState::Idle,
            consecutive_failures: 0,
        })
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// One full FETCHING → CHECKPOINTING pass. On `SourceError` the
    /// cursor is untouched and the caller backs off.
    pub async fn run_cycle(&mut self) -> Result<CycleStats, SourceError> {
        let mut stats = CycleStats::default();

        self.state = WorkerState::Fetching;
        let t0 = std::time::Instant::now();
        let batch = match tokio::time::timeout(
            self.cfg.fetch_timeout,
            self.adapter.fetch_since(&self.cursor),
        )
        .await
        {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                self.state = WorkerState::Backoff;
                return Err(e);
            }
            Err(_) => {
                self.state = WorkerState::Backoff;
                return Err(SourceError::Unavailable(anyhow!(
                    "fetch timed out after {:?}",
                    self.cfg.fetch_timeout
                )));
            }
        };
        histogram!("pipeline_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        stats.fetched = batch.posts.len();
        counter!("pipeline_posts_fetched_total").increment(batch.posts.len() as u64);
        self.consecutive_failures = 0;

        self.state = WorkerState::Scoring;
        let now = now_unix();
        let mut scored = Vec::with_capacity(batch.posts.len());
        for mut post in batch.posts {
            post.text = normalize_text(&post.text);
            if post.text.is_empty() {
                stats.filtered += 1;
                counter!("pipeline_posts_filtered_total").increment(1);
                continue;
            }
            let score = self.scorer.score(&post.text);
            // Scorer contract: pure, total, bounded. Out-of-range output
            // means a misconfigured scorer and must abort the worker.
            assert!(
                (-1.0..=1.0).contains(&score),
                "scorer returned out-of-range score {score} for adapter {}",
                self.adapter.name()
            );
            scored.push(ScoredPost {
                post,
                score,
                scored_at: now,
            });
        }
        stats.scored = scored.len();
        counter!("pipeline_posts_scored_total").increment(scored.len() as u64);

        self.state = WorkerState::Aggregating;
        for sp in &scored {
            match self.aggregator.ingest(sp, now) {
                IngestOutcome::Recorded => stats.recorded += 1,
                IngestOutcome::Duplicate => stats.duplicates += 1,
                IngestOutcome::StaleWindow => stats.stale += 1,
            }
        }

        self.state = WorkerState::Checkpointing;
        let checkpoint = Checkpoint {
            adapter: self.adapter.name().to_string(),
            cursor: batch.next_cursor.clone(),
            updated_at: now,
        };
        match self.checkpoints.store(&checkpoint).await {
            Ok(()) => self.cursor = batch.next_cursor,
            Err(e) => {
                // Keep the old cursor: the batch will be re-fetched and
                // the aggregator's dedup absorbs the replay.
                tracing::warn!(
                    error = ?e,
                    adapter = self.adapter.name(),
                    "checkpoint write failed; cursor not advanced"
                );
            }
        }

        self.state = WorkerState::Idle;
        gauge!("pipeline_last_cycle_ts").set(now as f64);
        Ok(stats)
    }

    /// Exponential backoff delay for the current failure streak, with
    /// up to 25% additive jitter.
    fn backoff_delay(&mut self) -> Duration {
        let shift = self.consecutive_failures.min(16);
        let exp = self.cfg.backoff_base.saturating_mul(1u32 << shift);
        let capped = exp.min(self.cfg.backoff_cap);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let jitter_cap_ms = capped.as_millis() as u64 / 4;
        let jitter = if jitter_cap_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_cap_ms))
        } else {
            Duration::ZERO
        };
        capped + jitter
    }

    /// Poll forever. Fetch failures back off without advancing the
    /// checkpoint; everything else is logged per cycle.
    pub async fn run(mut self) {
        let name = self.adapter.name();
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            loop {
                match self.run_cycle().await {
                    Ok(stats) => {
                        tracing::info!(
                            target: "pipeline",
                            adapter = name,
                            fetched = stats.fetched,
                            filtered = stats.filtered,
                            scored = stats.scored,
                            recorded = stats.recorded,
                            duplicates = stats.duplicates,
                            stale = stats.stale,
                            "ingest cycle"
                        );
                        break;
                    }
                    Err(SourceError::Unavailable(e)) => {
                        counter!("pipeline_fetch_errors_total").increment(1);
                        let delay = self.backoff_delay();
                        tracing::warn!(
                            target: "pipeline",
                            adapter = name,
                            state = self.state.as_str(),
                            error = ?e,
                            delay_ms = delay.as_millis() as u64,
                            "source unavailable; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Periodic flush of closed windows into the export sink. Buckets that
/// fail to append stay pending and are retried next tick; the sink only
/// ever sees rows it has not written yet.
pub struct FlushWorker {
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn BucketSink>,
    pending: Vec<FinalizedBucket>,
}

impl FlushWorker {
    pub fn new(aggregator: Arc<Aggregator>, sink: Arc<dyn BucketSink>) -> Self {
        Self {
            aggregator,
            sink,
            pending: Vec::new(),
        }
    }

    /// Finalize everything closed as of `as_of` and append it (plus any
    /// previously failed rows). Returns the number of rows written.
    pub async fn flush_once(&mut self, as_of: u64) -> Result<usize> {
        self.pending.extend(self.aggregator.flush(as_of));
        if self.pending.is_empty() {
            return Ok(0);
        }
        match self.sink.append(&self.pending).await {
            Ok(()) => {
                let n = self.pending.len();
                self.pending.clear();
                Ok(n)
            }
            Err(e) => {
                tracing::error!(error = ?e, rows = self.pending.len(), "bucket export failed; will retry");
                Err(e)
            }
        }
    }

    pub async fn run(mut self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let _ = self.flush_once(now_unix()).await;
        }
    }

    /// Shutdown path: force every open window closed and drain the sink.
    pub async fn drain(&mut self) -> Result<usize> {
        let horizon = now_unix()
            + self.aggregator.window_size_secs()
            + self.aggregator.late_arrival_tolerance_secs();
        self.flush_once(horizon).await
    }
}

/// Current UNIX time in seconds.
pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
