// tests/export_csv.rs
use std::collections::BTreeMap;

use btc_sentiment_pipeline::aggregate::FinalizedBucket;
use btc_sentiment_pipeline::export::{BucketSink, CsvBucketSink};
use btc_sentiment_pipeline::sentiment::SentimentLabel;

fn bucket(window_start: u64, mean: f64) -> FinalizedBucket {
    let mut by_adapter = BTreeMap::new();
    by_adapter.insert("x".to_string(), 2u64);
    by_adapter.insert("telegram".to_string(), 1u64);
    FinalizedBucket {
        window_start,
        window_size: 3600,
        post_count: 3,
        mean,
        variance: 0.01,
        label: SentimentLabel::from_score(mean),
        by_adapter,
    }
}

#[tokio::test]
async fn header_once_then_append_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buckets.csv");
    let sink = CsvBucketSink::new(&path);

    sink.append(&[bucket(0, 0.25)]).await.unwrap();
    sink.append(&[bucket(3600, -0.5), bucket(7200, 0.0)])
        .await
        .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("window_start,window_size,post_count,mean,variance,label"));
    assert!(lines[1].contains("positive"));
    assert!(lines[2].contains("negative"));
    assert!(lines[3].contains("neutral"));
    // Adapter breakdown rides along in a single column.
    assert!(lines[1].contains("telegram=1;x=2"));

    // Earlier rows are untouched by later appends.
    assert_eq!(lines.iter().filter(|l| l.starts_with("window_start")).count(), 1);
}

#[tokio::test]
async fn creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/buckets.csv");
    let sink = CsvBucketSink::new(&path);
    sink.append(&[bucket(0, 0.0)]).await.unwrap();
    assert!(path.exists());
}
