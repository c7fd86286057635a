use crate::types::{AggregatorError, FetchConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "news-aggregator.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://news.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Article text beyond this many characters is cut before the request
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 60,
            max_input_chars: 12_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub claim_ttl_seconds: u64,
    pub concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            claim_ttl_seconds: 600,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Rnz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
}

impl SourceConfig {
    pub fn rnz(section: &str) -> Self {
        Self {
            name: format!("rnz_{}", section),
            kind: SourceKind::Rnz,
            url: None,
        }
    }
}

impl AppConfig {
    /// Reads the JSON file at `path` (absent file means defaults) and applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let raw = std::fs::read_to_string(path)?;
            Self::from_json(&raw)?
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AggregatorError::Config(format!("Invalid configuration file: {}", e)))
    }

    /// `lookup` resolves an environment variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.concurrency == 0 {
            return Err(AggregatorError::Config(
                "analysis.concurrency must be at least 1".to_string(),
            ));
        }

        if self.analysis.claim_ttl_seconds <= self.llm.timeout_seconds {
            return Err(AggregatorError::Config(format!(
                "analysis.claim_ttl_seconds ({}) must exceed llm.timeout_seconds ({})",
                self.analysis.claim_ttl_seconds, self.llm.timeout_seconds
            )));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AggregatorError::Config("Source name must not be empty".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(AggregatorError::Config(format!(
                    "Duplicate source name: {}",
                    source.name
                )));
            }
        }

        Ok(())
    }

    /// Defaults with the RNZ sections spelled out, as written by `init`.
    pub fn starter() -> Self {
        Self {
            sources: ["national", "world", "business", "political"]
                .iter()
                .map(|section| SourceConfig::rnz(section))
                .collect(),
            ..Self::default()
        }
    }

    /// Writes a starter configuration to `path`. An existing file is kept
    /// unless `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<Self> {
        if path.exists() && !force {
            return Err(AggregatorError::Config(format!(
                "{} already exists; pass --force to replace it",
                path.display()
            )));
        }
        let config = Self::starter();
        config.save(path)?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, replacing any file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw + "\n")?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    /// Configured sources, or the RNZ national feed when none are listed.
    pub fn effective_sources(&self) -> Vec<SourceConfig> {
        if self.sources.is_empty() {
            vec![SourceConfig::rnz("national")]
        } else {
            self.sources.clone()
        }
    }
}
