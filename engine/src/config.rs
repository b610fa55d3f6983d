//! Render configuration.
//!
//! The engine never reads configuration implicitly; callers construct a
//! [`RenderConfig`] (or load one from a TOML file) and hand it to the
//! renderer. Limits and policy knobs live here instead of being hard-coded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;
const DEFAULT_PLACEHOLDER_WAIT_RETRIES: u32 = 3;
const DEFAULT_PLACEHOLDER_TIMEOUT_MS: u64 = 250;

const fn default_max_concurrent_tasks() -> usize {
    DEFAULT_MAX_CONCURRENT_TASKS
}

const fn default_placeholder_wait_retries() -> u32 {
    DEFAULT_PLACEHOLDER_WAIT_RETRIES
}

const fn default_placeholder_timeout_ms() -> u64 {
    DEFAULT_PLACEHOLDER_TIMEOUT_MS
}

fn default_container_tag() -> String {
    "div".to_string()
}

/// Tunables for one render.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum in-flight tasks per scheduler group; excess work queues FIFO.
    pub max_concurrent_tasks: usize,
    /// How many discovery rounds the placeholder wait loop runs before giving
    /// up best-effort. Bounded by design; resolving one placeholder may
    /// register new ones mid-wait.
    pub placeholder_wait_retries: u32,
    /// Per-placeholder timeout inside the wait loop, in milliseconds.
    pub placeholder_timeout_ms: u64,
    /// Tag of the container element push-mode blocks are wrapped in.
    pub container_tag: String,
    /// Trust dirty bits and skip clean subtrees. Off by default: one-shot
    /// complete renders force a full walk because dirty state cannot be
    /// trusted after external mutation.
    pub incremental: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            placeholder_wait_retries: default_placeholder_wait_retries(),
            placeholder_timeout_ms: default_placeholder_timeout_ms(),
            container_tag: default_container_tag(),
            incremental: false,
        }
    }
}

impl RenderConfig {
    /// Preset for interactive/responsive contexts: keep the in-flight count
    /// low so the cooperative loop stays responsive.
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            max_concurrent_tasks: 2,
            ..Self::default()
        }
    }

    /// Preset for IO-bound contexts: most tasks park on external work, so a
    /// higher in-flight count wins.
    #[must_use]
    pub fn io_bound() -> Self {
        Self {
            max_concurrent_tasks: 32,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn placeholder_timeout(&self) -> Duration {
        Duration::from_millis(self.placeholder_timeout_ms)
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}
