//! Bucket export sink. Finalized buckets are append-only: a row written
//! here is never rewritten in place.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use csv::Writer;

use crate::aggregate::FinalizedBucket;

#[async_trait::async_trait]
pub trait BucketSink: Send + Sync {
    /// Append finalized buckets. Called only with windows the aggregator
    /// has already made immutable; callers keep the slice for retry when
    /// the append fails.
    async fn append(&self, buckets: &[FinalizedBucket]) -> Result<()>;
}

/// Appends rows to a single CSV file, writing the header once when the
/// file is created.
#[derive(Debug)]
pub struct CsvBucketSink {
    path: PathBuf,
    // std Mutex: the critical section is a short synchronous file write.
    lock: Mutex<()>,
}

const HEADER: [&str; 7] = [
    "window_start",
    "window_size",
    "post_count",
    "mean",
    "variance",
    "label",
    "by_adapter",
];

impl CsvBucketSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append_sync(&self, buckets: &[FinalizedBucket]) -> Result<()> {
        let _guard = self.lock.lock().expect("csv sink mutex poisoned");

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating export dir {}", parent.display()))?;
            }
        }

        let fresh = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening export file {}", self.path.display()))?;
        let mut writer = Writer::from_writer(file);

        if fresh {
            writer.write_record(HEADER)?;
        }
        for b in buckets {
            let breakdown = b
                .by_adapter
                .iter()
                .map(|(name, n)| format!("{name}={n}"))
                .collect::<Vec<_>>()
                .join(";");
            writer.write_record([
                b.window_start.to_string(),
                b.window_size.to_string(),
                b.post_count.to_string(),
                b.mean.to_string(),
                b.variance.to_string(),
                b.label.as_str().to_string(),
                breakdown,
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BucketSink for CsvBucketSink {
    async fn append(&self, buckets: &[FinalizedBucket]) -> Result<()> {
        self.append_sync(buckets)
    }
}

// --- Test helper ---
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Mutex<Vec<FinalizedBucket>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BucketSink for MemorySink {
    async fn append(&self, buckets: &[FinalizedBucket]) -> Result<()> {
        self.rows.lock().unwrap().extend_from_slice(buckets);
        Ok(())
    }
}
