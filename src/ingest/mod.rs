// src/ingest/mod.rs
pub mod pipeline;
pub mod providers;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_posts_fetched_total",
            "Posts returned by adapters before normalization."
        );
        describe_counter!(
            "pipeline_posts_scored_total",
            "Posts scored and handed to the aggregator."
        );
        describe_counter!(
            "pipeline_posts_filtered_total",
            "Posts dropped because normalization left no text."
        );
        describe_counter!(
            "pipeline_fetch_errors_total",
            "Adapter fetch failures (retried with backoff)."
        );
        describe_counter!(
            "aggregate_duplicates_total",
            "Posts rejected by per-bucket deduplication."
        );
        describe_counter!(
            "aggregate_stale_total",
            "Posts rejected because their window is past tolerance."
        );
        describe_counter!(
            "aggregate_buckets_flushed_total",
            "Buckets finalized and handed to the export sink."
        );
        describe_histogram!("pipeline_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_gauge!(
            "aggregate_active_buckets",
            "Buckets currently open for late arrivals."
        );
        describe_gauge!(
            "pipeline_last_cycle_ts",
            "Unix ts when a pipeline worker last completed a cycle."
        );
    });
}

/// Normalize post text: decode entities, strip markup, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode (Telegram HTML mode, &amp; in tweets)
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_decodes_entities() {
        let s = "  to the&nbsp;&nbsp; <b>moon</b>  ";
        assert_eq!(normalize_text(s), "to the moon");
    }

    #[test]
    fn normalize_text_folds_curly_quotes() {
        assert_eq!(normalize_text("\u{201C}hodl\u{201D}"), "\"hodl\"");
    }

    #[test]
    fn normalize_text_caps_length() {
        let s = "x".repeat(4000);
        assert_eq!(normalize_text(&s).chars().count(), 1500);
    }
}
