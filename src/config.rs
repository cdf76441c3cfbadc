use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::ImportSettings;
use crate::payload::DEFAULT_DURATION;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImporterConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Import proxy to route through; unset means talk to the dashboard directly.
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default)]
    pub max_latency: u64,
    #[serde(default)]
    pub min_latency: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_port() -> u16 { 3000 }
fn default_duration() -> u64 { DEFAULT_DURATION }
fn default_log_level() -> String { "info".into() }

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            proxy_url: None,
            base_url: None,
            cookie: None,
            duration: default_duration(),
            max_latency: 0,
            min_latency: 0,
            log_level: default_log_level(),
        }
    }
}

impl ImporterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Loads `path` when it exists; a missing file means built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn settings(&self) -> ImportSettings {
        ImportSettings {
            duration: self.duration,
            max_latency: self.max_latency,
            min_latency: self.min_latency,
        }
    }
}
