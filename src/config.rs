use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::models::{Window, WindowKey, WindowSchedule};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub origin: OriginConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Forum names to walk, in order. Invalid names are rejected at load.
    pub sources: Vec<String>,
    /// Daily ingestion budget: max new posts per source per invocation.
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,
    /// Window keys, freshest first. Defaults to day/week/month/year.
    #[serde(default = "default_windows")]
    pub windows: Vec<String>,
    /// Score floor for ranked retrieval.
    #[serde(default = "default_min_score")]
    pub min_score: i64,
    /// Score floor for freshest-window retrieval (not yet voted on).
    #[serde(default = "default_min_score_fresh")]
    pub min_score_fresh: i64,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
}

fn default_max_per_run() -> usize {
    500
}
fn default_windows() -> Vec<String> {
    vec![
        "day".to_string(),
        "week".to_string(),
        "month".to_string(),
        "year".to_string(),
    ]
}
fn default_min_score() -> i64 {
    10
}
fn default_min_score_fresh() -> i64 {
    2
}
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./data/forage_progress.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OriginConfig {
    /// Transport variant: `public`, `oauth`, or `archive`.
    #[serde(default = "default_origin_variant")]
    pub variant: String,
    #[serde(default = "default_origin_base_url")]
    pub base_url: String,
    /// Mandatory identification header for the origin's rate limiter.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Environment variable holding the bearer token (`oauth` variant only).
    #[serde(default)]
    pub token_env: Option<String>,
    /// Hard inter-request delay at the origin boundary.
    #[serde(default = "default_origin_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_origin_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Page size requested from the listing endpoint (origin caps at 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_origin_variant() -> String {
    "public".to_string()
}
fn default_origin_base_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_user_agent() -> String {
    "forage:v0.3 (personal use)".to_string()
}
fn default_origin_delay_ms() -> u64 {
    1_000
}
fn default_origin_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// `groq`, `openai-compatible`, or `disabled`.
    #[serde(default = "default_ai_provider")]
    pub provider: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,
    /// Delay between AI calls (conservative for free tiers).
    #[serde(default = "default_ai_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_ai_retries")]
    pub max_retries: u32,
    /// Base backoff; grows multiplicatively on each rate-limit retry.
    #[serde(default = "default_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key_env: default_ai_key_env(),
            request_delay_ms: default_ai_delay_ms(),
            max_retries: default_ai_retries(),
            base_backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ai_provider() -> String {
    "groq".to_string()
}
fn default_ai_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_ai_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_ai_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_ai_delay_ms() -> u64 {
    2_000
}
fn default_ai_retries() -> u32 {
    5
}
fn default_backoff_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    /// Table identifier in the remote store. Empty means not configured.
    #[serde(default)]
    pub table_id: String,
    /// Environment variable holding the store API token.
    #[serde(default = "default_store_token_env")]
    pub token_env: String,
    /// Page size for the known-ID listing.
    #[serde(default = "default_store_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_base_url(),
            table_id: String::new(),
            token_env: default_store_token_env(),
            page_size: default_store_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_store_token_env() -> String {
    "FORAGE_STORE_TOKEN".to_string()
}
fn default_store_page_size() -> usize {
    1_000
}

static SOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,21}$").unwrap());

impl HarvestConfig {
    /// The window schedule described by `windows`, validated at load time.
    pub fn schedule(&self) -> WindowSchedule {
        WindowSchedule::new(
            self.windows
                .iter()
                .filter_map(|w| WindowKey::parse(w))
                .map(|key| Window { key })
                .collect(),
        )
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.harvest.sources.is_empty() {
        anyhow::bail!("harvest.sources must list at least one source");
    }
    for source in &config.harvest.sources {
        if !SOURCE_NAME.is_match(source) {
            anyhow::bail!(
                "Invalid source name '{}' (alphanumeric and underscore, 3-21 chars)",
                source
            );
        }
    }

    if config.harvest.max_per_run == 0 {
        anyhow::bail!("harvest.max_per_run must be > 0");
    }

    if config.harvest.windows.is_empty() {
        anyhow::bail!("harvest.windows must list at least one window");
    }
    for window in &config.harvest.windows {
        if WindowKey::parse(window).is_none() {
            anyhow::bail!(
                "Unknown window '{}'. Must be hour, day, week, month, year, or all.",
                window
            );
        }
    }

    if config.harvest.min_score_fresh > config.harvest.min_score {
        anyhow::bail!("harvest.min_score_fresh must not exceed harvest.min_score");
    }

    match config.origin.variant.as_str() {
        "public" | "archive" => {}
        "oauth" => {
            if config.origin.token_env.is_none() {
                anyhow::bail!("origin.token_env is required for the oauth variant");
            }
        }
        other => anyhow::bail!(
            "Unknown origin variant: '{}'. Must be public, oauth, or archive.",
            other
        ),
    }

    match config.ai.provider.as_str() {
        "groq" | "openai-compatible" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown AI provider: '{}'. Must be groq, openai-compatible, or disabled.",
            other
        ),
    }

    Ok(())
}
