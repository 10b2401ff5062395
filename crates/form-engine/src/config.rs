use std::path::Path;
use std::time::Duration;

use form_spec::VisibilityMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which cross-field rules re-run after a value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossFieldScope {
    /// Every rule re-runs on every change.
    #[default]
    AnyChange,
    /// Only rules listing one of the changed fields re-run.
    DeclaredFields,
}

/// Runtime knobs of a form engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key of the persisted draft; persistence is off when unset.
    pub storage_key: Option<String>,
    pub persist_debounce_ms: u64,
    pub restore_on_mount: bool,
    /// Field names or glob patterns never written to the draft.
    pub exclude: Vec<String>,
    pub async_debounce_ms: u64,
    pub blur_debounce_ms: u64,
    pub auto_submit_ms: Option<u64>,
    pub cross_field_scope: CrossFieldScope,
    pub visibility_mode: VisibilityMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_key: None,
            persist_debounce_ms: 1_000,
            restore_on_mount: false,
            exclude: Vec::new(),
            async_debounce_ms: 500,
            blur_debounce_ms: 150,
            auto_submit_ms: None,
            cross_field_scope: CrossFieldScope::AnyChange,
            visibility_mode: VisibilityMode::Visible,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn async_debounce(&self) -> Duration {
        Duration::from_millis(self.async_debounce_ms)
    }

    pub fn blur_debounce(&self) -> Duration {
        Duration::from_millis(self.blur_debounce_ms)
    }

    pub fn auto_submit_delay(&self) -> Option<Duration> {
        self.auto_submit_ms.map(Duration::from_millis)
    }
}
