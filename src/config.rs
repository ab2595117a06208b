// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/pipeline.toml";

const ENV_X_BEARER: &str = "X_BEARER_TOKEN";
const ENV_TG_BOT: &str = "TG_BOT_TOKEN";

/// Top-level pipeline configuration. Secrets never live in the file;
/// they are pulled from the environment during `load`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window_size_secs: u64,
    pub late_arrival_tolerance_secs: u64,
    pub poll_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub checkpoint_dir: PathBuf,
    pub export_path: PathBuf,
    pub metrics_addr: String,
    pub adapters: AdaptersConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size_secs: 3600,
            late_arrival_tolerance_secs: 1800,
            poll_interval_secs: 60,
            flush_interval_secs: 30,
            fetch_timeout_secs: 30,
            backoff_base_secs: 1,
            backoff_cap_secs: 60,
            checkpoint_dir: PathBuf::from("data/checkpoints"),
            export_path: PathBuf::from("data/processed/bucket_sentiment.csv"),
            metrics_addr: "127.0.0.1:8000".to_string(),
            adapters: AdaptersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub x: XAdapterConfig,
    pub telegram: TelegramAdapterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XAdapterConfig {
    pub enabled: bool,
    pub query: String,
    /// Filled from $X_BEARER_TOKEN, never from the file.
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

impl Default for XAdapterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            query: "(bitcoin OR btc) lang:en -is:retweet".to_string(),
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramAdapterConfig {
    pub enabled: bool,
    pub chats: Vec<String>,
    /// Filled from $TG_BOT_TOKEN, never from the file.
    #[serde(skip)]
    pub bot_token: Option<String>,
}

impl PipelineConfig {
    /// Load using env var + fallback:
    /// 1) $PIPELINE_CONFIG_PATH (must exist)
    /// 2) config/pipeline.toml
    /// 3) built-in defaults (adapters disabled; `validate` then fails fast)
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("PIPELINE_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_PATH);
            if default.exists() {
                Self::load_from(&default)?
            } else {
                Self::default()
            }
        };
        cfg.adapters.x.bearer_token = std::env::var(ENV_X_BEARER).ok();
        cfg.adapters.telegram.bot_token = std::env::var(ENV_TG_BOT).ok();
        Ok(cfg)
    }

    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
    }

    /// Unrecoverable configuration errors fail here, before any fetch.
    pub fn validate(&self) -> Result<()> {
        if self.window_size_secs == 0 {
            bail!("window_size_secs must be > 0");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be > 0");
        }
        if self.flush_interval_secs == 0 {
            bail!("flush_interval_secs must be > 0");
        }
        if self.backoff_base_secs == 0 || self.backoff_cap_secs < self.backoff_base_secs {
            bail!("backoff: base must be > 0 and cap >= base");
        }
        if !self.adapters.x.enabled && !self.adapters.telegram.enabled {
            bail!("no adapters enabled; enable [adapters.x] or [adapters.telegram]");
        }
        if self.adapters.x.enabled && self.adapters.x.bearer_token.is_none() {
            bail!("adapters.x enabled but X_BEARER_TOKEN is not set");
        }
        if self.adapters.telegram.enabled {
            if self.adapters.telegram.bot_token.is_none() {
                bail!("adapters.telegram enabled but TG_BOT_TOKEN is not set");
            }
            if self.adapters.telegram.chats.is_empty() {
                bail!("adapters.telegram enabled but no chats configured");
            }
        }
        Ok(())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[adapters");
    if try_toml {
        if let Ok(v) = toml::from_str(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = toml::from_str(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported pipeline config format"))
}
