//! Configuration loading and validation.
//!
//! Ticker Mirror is configured with a single TOML file (default
//! `config/mirror.toml`). Every section except `[db]` and `[index]` has
//! defaults.
//!
//! ```toml
//! [db]
//! path = "./data/artifacts.sqlite"
//!
//! [index]
//! path = "./data/index.sqlite"
//!
//! [chunking]
//! max_tokens = 200
//! overlap_tokens = 25
//! max_units = 50
//!
//! [freshness.max_age_hours]
//! price = 12
//!
//! [embedding]
//! provider = "hashed"     # disabled | openai | hashed
//! dims = 256
//!
//! [timeouts]
//! fetch_secs = 60
//!
//! [fetchers.structured]
//! url_template = "https://quotes.example.com/{ticker}/{component}.json"
//!
//! [fetchers.sec]
//! user_agent = "Example Corp ops@example.com"
//!
//! [[entities]]
//! ticker = "PLTR"
//! cik = "0001321655"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use ticker_mirror_core::chunk::ChunkingParams;
use ticker_mirror_core::models::{Entity, ExternalId};
use ticker_mirror_core::policy::FreshnessPolicy;
use ticker_mirror_core::registry::EntityRegistry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fetchers: FetchersConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_max_units")]
    pub max_units: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            max_units: default_max_units(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            max_units: self.max_units,
        }
    }
}

fn default_max_tokens() -> usize {
    200
}
fn default_overlap() -> usize {
    25
}
fn default_max_units() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FreshnessConfig {
    /// Per-component overrides in hours, keyed by component name.
    #[serde(default)]
    pub max_age_hours: BTreeMap<String, u64>,
}

impl FreshnessConfig {
    pub fn policy(&self) -> Result<FreshnessPolicy> {
        let policy = FreshnessPolicy::default()
            .with_overrides(self.max_age_hours.iter().map(|(k, v)| (k.as_str(), *v)))?;
        Ok(policy)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Per-step deadlines for the control plane's external calls.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_storage_secs")]
    pub storage_secs: u64,
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_embed_secs")]
    pub embed_secs: u64,
    #[serde(default = "default_index_secs")]
    pub index_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            storage_secs: default_storage_secs(),
            fetch_secs: default_fetch_secs(),
            embed_secs: default_embed_secs(),
            index_secs: default_index_secs(),
        }
    }
}

fn default_storage_secs() -> u64 {
    10
}
fn default_fetch_secs() -> u64 {
    120
}
fn default_embed_secs() -> u64 {
    120
}
fn default_index_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FetchersConfig {
    /// JSON source for the structured components.
    pub structured: Option<HttpFetcherConfig>,
    /// SEC EDGAR annual filings for US entities.
    pub sec: Option<SecFetcherConfig>,
    /// Filing text for non-US entities.
    pub filings: Option<HttpFetcherConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpFetcherConfig {
    /// URL with `{ticker}`, `{component}`, `{cik}`, `{scrip_code}` placeholders.
    pub url_template: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecFetcherConfig {
    /// SEC requires a descriptive User-Agent with a contact address.
    pub user_agent: String,
    #[serde(default = "default_sec_data_url")]
    pub data_url: String,
    #[serde(default = "default_sec_archives_url")]
    pub archives_url: String,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
    #[serde(default = "default_filing_max_chars")]
    pub max_chars: usize,
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_sec_data_url() -> String {
    "https://data.sec.gov".to_string()
}
fn default_sec_archives_url() -> String {
    "https://www.sec.gov".to_string()
}
fn default_filing_max_chars() -> usize {
    80_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// An extra registry row.
#[derive(Debug, Deserialize, Clone)]
pub struct EntityConfig {
    pub ticker: String,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub scrip_code: Option<String>,
}

impl EntityConfig {
    pub fn to_entity(&self) -> Result<Entity> {
        let ext = ExternalId::from_parts(&self.ticker, self.cik.clone(), self.scrip_code.clone())?;
        let entity = EntityRegistry::empty()
            .resolve(&self.ticker, ext.as_ref())
            .with_context(|| format!("invalid [[entities]] row '{}'", self.ticker))?;
        Ok(entity)
    }
}

impl Config {
    /// Built-in registry plus configured `[[entities]]` rows.
    pub fn registry(&self) -> Result<EntityRegistry> {
        let extra = self
            .entities
            .iter()
            .map(EntityConfig::to_entity)
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityRegistry::builtin().with_entries(extra))
    }

    pub fn step_timeouts(&self) -> crate::pipeline::StepTimeouts {
        crate::pipeline::StepTimeouts {
            storage: Duration::from_secs(self.timeouts.storage_secs),
            fetch: Duration::from_secs(self.timeouts.fetch_secs),
            embed: Duration::from_secs(self.timeouts.embed_secs),
            index: Duration::from_secs(self.timeouts.index_secs),
        }
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
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.max_units == 0 {
        bail!("chunking.max_units must be > 0");
    }

    config.freshness.policy()?;
    config.registry()?;

    let t = &config.timeouts;
    if t.storage_secs == 0 || t.fetch_secs == 0 || t.embed_secs == 0 || t.index_secs == 0 {
        bail!("timeouts must all be > 0 seconds");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "hashed" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        "openai" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hashed.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if let Some(sec) = &config.fetchers.sec {
        if sec.user_agent.trim().is_empty() {
            bail!("fetchers.sec.user_agent must not be empty");
        }
    }
    for (name, http) in [
        ("structured", &config.fetchers.structured),
        ("filings", &config.fetchers.filings),
    ] {
        if let Some(http) = http {
            if !http.url_template.contains("{ticker}")
                && !http.url_template.contains("{cik}")
                && !http.url_template.contains("{scrip_code}")
            {
                bail!(
                    "fetchers.{}.url_template must reference {{ticker}}, {{cik}}, or {{scrip_code}}",
                    name
                );
            }
        }
    }

    Ok(())
}
