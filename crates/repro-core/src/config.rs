//! Configuration management for Repro
//!
//! This module provides the host-level settings a run needs that are not part
//! of any formula: where scratch space lives and which scheduler, executor and
//! placement strategy to use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ReproError, Result};

/// Host-level Repro configuration
///
/// Loaded from `.repro/config.toml` under a base directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproConfig {
    /// Scratch root; every job gets `<work_dir>/jobs/<job-id>` to itself
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Scheduler name ("linear", "pool")
    #[serde(default = "default_scheduler")]
    pub scheduler: String,

    /// Concurrency bound for schedulers that run jobs in parallel
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Executor name
    #[serde(default = "default_executor")]
    pub executor: String,

    /// Placement strategy
    #[serde(default)]
    pub placer: PlacerMode,
}

/// How materialized inputs are placed into a job filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacerMode {
    /// Plain recursive copies; works unprivileged everywhere
    #[default]
    Copy,
    /// Bind and overlay mounts; Linux only, needs mount privileges
    Mount,
}

impl std::fmt::Display for PlacerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Mount => write!(f, "mount"),
        }
    }
}

impl std::str::FromStr for PlacerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "mount" => Ok(Self::Mount),
            _ => Err(format!("Invalid placer mode: {}", s)),
        }
    }
}

// Default value providers
fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("repro")
}

fn default_scheduler() -> String {
    "linear".to_string()
}

fn default_executor() -> String {
    "host".to_string()
}

impl ReproConfig {
    /// Load configuration from `.repro/config.toml` or use defaults
    pub fn load_or_default(base_dir: &Path) -> Result<Self> {
        let config_path = base_dir.join(".repro/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                ReproError::Config(format!(
                    "Failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.repro/config.toml`
    pub fn write_default(base_dir: &Path) -> Result<()> {
        let config_dir = base_dir.join(".repro");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ReproError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Directory holding per-job scratch space
    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    /// Directory holding transmat staging areas
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    /// Effective parallelism: the configured bound, else the host's CPU count
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            scheduler: default_scheduler(),
            concurrency: None,
            executor: default_executor(),
            placer: PlacerMode::default(),
        }
    }
}
