//! BTC Sentiment Pipeline — Binary Entrypoint
//! Loads config, starts the metrics endpoint, spawns one ingest worker
//! per enabled adapter, and runs the flush loop until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use btc_sentiment_pipeline::aggregate::{Aggregator, AggregatorCfg};
use btc_sentiment_pipeline::checkpoint::{CheckpointStore, FileCheckpointStore};
use btc_sentiment_pipeline::config::PipelineConfig;
use btc_sentiment_pipeline::export::{BucketSink, CsvBucketSink};
use btc_sentiment_pipeline::ingest::pipeline::{now_unix, FlushWorker, PipelineWorker, WorkerCfg};
use btc_sentiment_pipeline::ingest::providers::telegram::TelegramUpdatesAdapter;
use btc_sentiment_pipeline::ingest::providers::x_api::XSearchAdapter;
use btc_sentiment_pipeline::ingest::types::SourceAdapter;
use btc_sentiment_pipeline::metrics::Metrics;
use btc_sentiment_pipeline::sentiment::{LexiconScorer, SentimentScorer};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pipeline=info,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Unrecoverable configuration fails here, before any fetch begins.
    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    cfg.validate().context("validating pipeline config")?;

    let metrics = Metrics::init();
    let listener = tokio::net::TcpListener::bind(&cfg.metrics_addr)
        .await
        .with_context(|| format!("binding metrics endpoint {}", cfg.metrics_addr))?;
    let router = metrics.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = ?e, "metrics server exited");
        }
    });

    let aggregator = Arc::new(Aggregator::new(AggregatorCfg {
        window_size_secs: cfg.window_size_secs,
        late_arrival_tolerance_secs: cfg.late_arrival_tolerance_secs,
    }));
    let scorer: Arc<dyn SentimentScorer> = Arc::new(LexiconScorer::new());
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(&cfg.checkpoint_dir));
    let sink: Arc<dyn BucketSink> = Arc::new(CsvBucketSink::new(&cfg.export_path));

    let worker_cfg = WorkerCfg::from_config(&cfg);
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
    if cfg.adapters.x.enabled {
        let bearer = cfg
            .adapters
            .x
            .bearer_token
            .clone()
            .expect("validated: bearer token present");
        adapters.push(Box::new(XSearchAdapter::from_bearer(
            bearer,
            cfg.adapters.x.query.clone(),
        )));
    }
    if cfg.adapters.telegram.enabled {
        let token = cfg
            .adapters
            .telegram
            .bot_token
            .clone()
            .expect("validated: bot token present");
        adapters.push(Box::new(TelegramUpdatesAdapter::from_bot_token(
            token,
            cfg.adapters.telegram.chats.clone(),
        )));
    }

    let mut worker_handles = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let name = adapter.name();
        let worker = PipelineWorker::resume(
            adapter,
            scorer.clone(),
            aggregator.clone(),
            checkpoints.clone(),
            worker_cfg,
        )
        .await
        .with_context(|| format!("resuming worker for adapter {name}"))?;
        tracing::info!(adapter = name, cursor = ?worker.cursor(), "worker starting");
        worker_handles.push(tokio::spawn(worker.run()));
    }

    // Flush loop runs here so shutdown can drain it in place.
    let mut flush = FlushWorker::new(aggregator.clone(), sink.clone());
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.flush_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = flush.flush_once(now_unix()).await;
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown requested; draining open windows");
                for h in &worker_handles {
                    h.abort();
                }
                match flush.drain().await {
                    Ok(rows) => tracing::info!(rows, "final flush complete"),
                    Err(e) => tracing::error!(error = ?e, "final flush failed"),
                }
                break;
            }
        }
    }

    Ok(())
}
