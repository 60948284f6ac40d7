use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BabblerConfig {
    pub gateway: GatewayConfig,
    pub chain: ChainConfig,
    pub policy: PolicyConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    7300
}
fn default_bind() -> String {
    "127.0.0.1".into()
}

/// Learning and generation knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Characters that close a sentence.
    #[serde(default = "default_end_sentence")]
    pub end_sentence: String,
    /// Lookups allowed per generated sentence.
    #[serde(default = "default_max_walk_steps")]
    pub max_walk_steps: usize,
    /// Upper bound of the sentence-count draw.
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    /// How many of the heaviest matching pairs a lookup picks from.
    #[serde(default = "default_top_pairs")]
    pub top_pairs: usize,
}

impl ChainConfig {
    pub fn end_sentence_chars(&self) -> Vec<char> {
        self.end_sentence.chars().collect()
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            end_sentence: default_end_sentence(),
            max_walk_steps: default_max_walk_steps(),
            max_sentences: default_max_sentences(),
            top_pairs: default_top_pairs(),
        }
    }
}

fn default_end_sentence() -> String {
    ".!?".into()
}
fn default_max_walk_steps() -> usize {
    50
}
fn default_max_sentences() -> usize {
    4
}
fn default_top_pairs() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Substrings that force a reply when found in the lowercased text.
    #[serde(default = "default_anchors")]
    pub anchors: Vec<String>,
    /// Reply chance given to conversations seen for the first time.
    #[serde(default = "default_reply_chance")]
    pub default_reply_chance: u8,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            anchors: default_anchors(),
            default_reply_chance: default_reply_chance(),
        }
    }
}

fn default_anchors() -> Vec<String> {
    vec!["babbler".into()]
}
pub fn default_reply_chance() -> u8 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `memory` or `sqlite`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// SQLite database file. Defaults to `~/.babbler/babbler.db`.
    pub path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => state_dir().join("babbler.db"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "memory".into()
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `BABBLER_CONFIG` env var
/// 2. `~/.babbler/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<BabblerConfig> {
    let path = config_path();

    if path.exists() {
        load_from(&path)
    } else {
        info!("no config file found, using zero-config defaults");
        Ok(BabblerConfig::default())
    }
}

/// Load and validate a specific config file.
pub fn load_from(path: &std::path::Path) -> anyhow::Result<BabblerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let config: BabblerConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;

    validate(&config)?;

    info!("loaded config from {}", path.display());
    Ok(config)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BABBLER_CONFIG") {
        return PathBuf::from(path);
    }
    state_dir().join("config.toml")
}

fn state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".babbler")
}

/// Validate the config and return clear error messages.
pub fn validate(config: &BabblerConfig) -> anyhow::Result<()> {
    if config.chain.end_sentence.is_empty() {
        anyhow::bail!("chain.end_sentence must contain at least one character");
    }
    if config.chain.max_walk_steps == 0 {
        anyhow::bail!("chain.max_walk_steps must be > 0");
    }
    if config.chain.max_sentences == 0 {
        anyhow::bail!("chain.max_sentences must be > 0");
    }
    if config.chain.top_pairs == 0 {
        anyhow::bail!("chain.top_pairs must be > 0");
    }
    if config.policy.default_reply_chance > 100 {
        anyhow::bail!(
            "policy.default_reply_chance must be within 0..=100, got {}",
            config.policy.default_reply_chance
        );
    }
    if let Some(i) = config.policy.anchors.iter().position(|a| a.is_empty()) {
        anyhow::bail!("policy.anchors[{i}] must not be empty");
    }

    let valid_backends = ["memory", "sqlite"];
    if !valid_backends.contains(&config.store.backend.as_str()) {
        anyhow::bail!(
            "invalid store backend '{}': must be one of {:?}",
            config.store.backend,
            valid_backends
        );
    }

    Ok(())
}
