//! # Aggregator
//! Folds scored posts into fixed time windows, idempotently and
//! out-of-order-tolerantly. Each `ingest` is O(1); `flush` is O(active
//! windows), bounded by the late-arrival tolerance.
//!
//! Window starts are exact multiples of the window size since epoch, so
//! every adapter lands in the same canonical buckets. A window accepts
//! posts until the moment it becomes flushable (`window_start +
//! window_size + tolerance`), then is immutable forever.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::ingest::types::ScoredPost;
use crate::sentiment::SentimentLabel;

/// Outcome of folding one post. `Duplicate` and `StaleWindow` are
/// expected operational events, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded,
    Duplicate,
    StaleWindow,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorCfg {
    pub window_size_secs: u64,
    pub late_arrival_tolerance_secs: u64,
}

/// Thread-safe bucket map shared by all adapter workers. A single mutex
/// serializes `ingest` against `flush`, so a bucket's read and its
/// immutability transition are atomic.
#[derive(Debug)]
pub struct Aggregator {
    cfg: AggregatorCfg,
    inner: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<u64, Bucket>,
    /// Windows with `window_start < flushed_before` are finalized and
    /// reject further posts as stale.
    flushed_before: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    post_count: u64,
    score_sum: f64,
    score_sum_sq: f64,
    last_updated: u64,
    by_adapter: BTreeMap<String, u64>,
    /// Dedup identities, retained only while the bucket is mutable.
    seen: HashSet<String>,
}

/// Immutable flush output, one row per closed window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalizedBucket {
    pub window_start: u64,
    pub window_size: u64,
    pub post_count: u64,
    pub mean: f64,
    pub variance: f64,
    pub label: SentimentLabel,
    pub by_adapter: BTreeMap<String, u64>,
}

impl Aggregator {
    pub fn new(cfg: AggregatorCfg) -> Self {
        Self {
            cfg,
            inner: Mutex::new(State::default()),
        }
    }

    /// Fold one scored post into its window.
    pub fn ingest(&self, sp: &ScoredPost, now: u64) -> IngestOutcome {
        let w = self.cfg.window_size_secs;
        let tol = self.cfg.late_arrival_tolerance_secs;
        let bucket_key = sp.post.timestamp - sp.post.timestamp % w;

        let mut st = self.inner.lock().expect("aggregator mutex poisoned");

        let closed = bucket_key < st.flushed_before;
        let past_tolerance = bucket_key.saturating_add(w + tol) < now;
        if closed || past_tolerance {
            counter!("aggregate_stale_total").increment(1);
            tracing::debug!(
                adapter = %sp.post.adapter,
                source_id = %sp.post.source_id,
                window_start = bucket_key,
                "stale post rejected"
            );
            return IngestOutcome::StaleWindow;
        }

        let bucket = st.buckets.entry(bucket_key).or_default();
        let identity = format!("{}\u{1f}{}", sp.post.adapter, sp.post.source_id);
        if !bucket.seen.insert(identity) {
            counter!("aggregate_duplicates_total").increment(1);
            return IngestOutcome::Duplicate;
        }

        bucket.post_count += 1;
        bucket.score_sum += sp.score;
        bucket.score_sum_sq += sp.score * sp.score;
        bucket.last_updated = now;
        *bucket.by_adapter.entry(sp.post.adapter.clone()).or_insert(0) += 1;

        gauge!("aggregate_active_buckets").set(st.buckets.len() as f64);
        IngestOutcome::Recorded
    }

    /// Finalize every window no longer eligible for late arrivals
    /// (`window_start + window_size + tolerance <= as_of`). Finalized
    /// windows are removed and never re-emitted; later posts for them
    /// are rejected as stale.
    pub fn flush(&self, as_of: u64) -> Vec<FinalizedBucket> {
        let w = self.cfg.window_size_secs;
        let tol = self.cfg.late_arrival_tolerance_secs;

        let mut st = self.inner.lock().expect("aggregator mutex poisoned");

        let Some(cutoff) = as_of.checked_sub(w + tol) else {
            return Vec::new();
        };

        let keys: Vec<u64> = st.buckets.range(..=cutoff).map(|(k, _)| *k).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let b = st.buckets.remove(&key).expect("bucket vanished during flush");
            // A bucket only exists because a post created it; zero here
            // means corrupted state and must not be exported silently.
            assert!(b.post_count > 0, "bucket {key} finalized with zero posts");

            let n = b.post_count as f64;
            let mean = b.score_sum / n;
            let variance = (b.score_sum_sq / n - mean * mean).max(0.0);
            out.push(FinalizedBucket {
                window_start: key,
                window_size: w,
                post_count: b.post_count,
                mean,
                variance,
                label: SentimentLabel::from_score(mean),
                by_adapter: b.by_adapter,
            });
        }

        st.flushed_before = st.flushed_before.max(cutoff + 1);

        counter!("aggregate_buckets_flushed_total").increment(out.len() as u64);
        gauge!("aggregate_active_buckets").set(st.buckets.len() as f64);
        out
    }

    /// Number of windows still open for late arrivals.
    pub fn active_buckets(&self) -> usize {
        self.inner
            .lock()
            .expect("aggregator mutex poisoned")
            .buckets
            .len()
    }

    pub fn window_size_secs(&self) -> u64 {
        self.cfg.window_size_secs
    }

    pub fn late_arrival_tolerance_secs(&self) -> u64 {
        self.cfg.late_arrival_tolerance_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Post;

    fn scored(adapter: &str, id: &str, ts: u64, score: f64) -> ScoredPost {
        ScoredPost {
            post: Post {
                adapter: adapter.to_string(),
                source_id: id.to_string(),
                timestamp: ts,
                text: String::new(),
                author_id: "a1".to_string(),
            },
            score,
            scored_at: ts,
        }
    }

    fn agg(window: u64, tol: u64) -> Aggregator {
        Aggregator::new(AggregatorCfg {
            window_size_secs: window,
            late_arrival_tolerance_secs: tol,
        })
    }

    #[test]
    fn fold_math_matches_closed_form() {
        let a = agg(60, 30);
        for (i, s) in [0.5f64, -0.25, 1.0].iter().enumerate() {
            let out = a.ingest(&scored("x", &format!("p{i}"), 10 + i as u64, *s), 50);
            assert_eq!(out, IngestOutcome::Recorded);
        }
        let rows = a.flush(1_000);
        assert_eq!(rows.len(), 1);
        let b = &rows[0];
        assert_eq!(b.window_start, 0);
        assert_eq!(b.post_count, 3);
        let mean = (0.5 - 0.25 + 1.0) / 3.0;
        assert!((b.mean - mean).abs() < 1e-12);
        let var = (0.25 + 0.0625 + 1.0) / 3.0 - mean * mean;
        assert!((b.variance - var).abs() < 1e-12);
    }

    #[test]
    fn duplicate_identity_is_counted_once() {
        let a = agg(60, 30);
        assert_eq!(a.ingest(&scored("x", "1", 5, 1.0), 10), IngestOutcome::Recorded);
        assert_eq!(a.ingest(&scored("x", "1", 5, 1.0), 11), IngestOutcome::Duplicate);
        // same id from a different adapter is a distinct post
        assert_eq!(
            a.ingest(&scored("telegram", "1", 5, -1.0), 12),
            IngestOutcome::Recorded
        );
        let rows = a.flush(1_000);
        assert_eq!(rows[0].post_count, 2);
    }

    #[test]
    fn flushed_window_rejects_even_fresh_now() {
        let a = agg(60, 10);
        assert_eq!(a.ingest(&scored("x", "1", 5, 1.0), 20), IngestOutcome::Recorded);
        let rows = a.flush(70);
        assert_eq!(rows.len(), 1);
        // now == window_start + window + tol is still acceptable by the
        // tolerance rule alone; the watermark must reject it.
        assert_eq!(a.ingest(&scored("x", "2", 6, 1.0), 70), IngestOutcome::StaleWindow);
    }

    #[test]
    fn variance_never_negative_on_rounding() {
        let a = agg(60, 0);
        let s = 0.1 + 0.2; // classic float noise
        a.ingest(&scored("x", "1", 1, s), 2);
        a.ingest(&scored("x", "2", 2, s), 3);
        let rows = a.flush(10_000);
        assert!(rows[0].variance >= 0.0);
    }
}
