//! Runtime configuration
//!
//! Layered: built-in defaults, then an optional JSON file, then environment
//! variables. Every field has a default so a bare `testgen` run works
//! against the per-user data directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_TEMPLATES_DIR: &str = "TESTGEN_TEMPLATES_DIR";
pub const ENV_API_URL: &str = "TESTGEN_API_URL";
pub const ENV_MODEL: &str = "TESTGEN_MODEL";
pub const ENV_MAX_TOKENS: &str = "TESTGEN_MAX_TOKENS";
pub const ENV_SAVE_GENERATED: &str = "TESTGEN_SAVE_GENERATED";
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";

/// LLM endpoint used by the adaptation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Messages API URL
    pub api_url: String,

    /// API key (from environment, never written back out)
    #[serde(skip_serializing)]
    pub api_key: String,

    pub model: String,

    /// Adapted documents copy every template step, so this stays generous
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: std::env::var(ENV_API_KEY).unwrap_or_default(),
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of `*.txt` template files
    pub templates_dir: PathBuf,

    /// Write adapted documents back into `templates_dir`
    pub save_generated: bool,

    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            templates_dir: data_dir().join("templates"),
            save_generated: true,
            llm: LlmConfig::default(),
        }
    }
}

/// Per-user data directory for the tool
pub fn data_dir() -> PathBuf {
    // XDG data dir on Linux, ~/Library/Application Support on macOS
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eero-testgen")
}

impl AppConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {:?}", path))?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    ///
    /// Unparseable numeric or boolean values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_TEMPLATES_DIR) {
            self.templates_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.llm.api_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.llm.model = model;
        }
        if let Some(raw) = lookup(ENV_MAX_TOKENS) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.llm.max_tokens = n,
                _ => tracing::warn!("Ignoring {}={:?}", ENV_MAX_TOKENS, raw),
            }
        }
        if let Some(raw) = lookup(ENV_SAVE_GENERATED) {
            match parse_flag(&raw) {
                Some(flag) => self.save_generated = flag,
                None => tracing::warn!("Ignoring {}={:?}", ENV_SAVE_GENERATED, raw),
            }
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.llm.api_key = key;
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
