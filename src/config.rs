//! Engine configuration
//!
//! Decode-runtime parameters fixed for the lifetime of a session. These are
//! tuning knobs loaded from a JSON file in the platform data directory, not
//! per-request options.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Element precision of the key/value cache.
///
/// The llama.cpp runtime keeps its cache in half precision by default; this
/// value is validated, reported in diagnostics, and drives the cache memory
/// estimate logged at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvPrecision {
    F16,
    F32,
}

impl KvPrecision {
    pub fn bytes_per_element(self) -> usize {
        match self {
            KvPrecision::F16 => 2,
            KvPrecision::F32 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KvPrecision::F16 => "f16",
            KvPrecision::F32 => "f32",
        }
    }
}

/// Decode-runtime configuration for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Context window in tokens (prompt plus output).
    pub context_length: u32,
    /// Batch capacity for prefill decoding.
    pub batch_size: u32,
    /// Threads for the forward pass.
    pub threads: i32,
    /// Key/value cache element precision.
    pub kv_precision: KvPrecision,
    /// Tokens reserved below the context limit so the final decode steps
    /// cannot overflow the window.
    pub safety_margin: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_length: 4096,
            batch_size: 512,
            threads: 4,
            kv_precision: KvPrecision::F16,
            safety_margin: 32,
        }
    }
}

impl EngineConfig {
    /// Clamp all parameters into usable ranges.
    pub fn validate(&mut self) {
        self.context_length = self.context_length.clamp(256, 131_072);

        if self.batch_size == 0 {
            self.batch_size = 512;
        }
        self.batch_size = self.batch_size.min(self.context_length);

        if self.threads <= 0 {
            self.threads = 4;
        }

        // The margin must leave room for at least a minimal prompt.
        self.safety_margin = self.safety_margin.clamp(8, self.context_length / 4);
    }

    /// Maximum tokenized prompt length a generation request may carry.
    /// Prompts at or above this fail fast without touching the decoder.
    pub fn prompt_budget(&self) -> usize {
        (self.context_length - self.safety_margin) as usize
    }
}

/// Get the config file path in the platform data directory
fn config_path() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("dev", "pocketlm", "pocketlm")
        .map(|dirs| dirs.data_dir().join("engine.json"))
        .ok_or_else(|| ConfigError::DataDir("Could not determine data directory".to_string()))
}

/// Load the engine config from disk.
///
/// Returns validated defaults if the file is missing or corrupted.
pub fn load_config() -> EngineConfig {
    match load_config_internal() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            EngineConfig::default()
        }
    }
}

fn load_config_internal() -> Result<EngineConfig, ConfigError> {
    let path = config_path()?;

    if !path.exists() {
        tracing::info!("Engine config not found, using defaults");
        return Ok(EngineConfig::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut config: EngineConfig = serde_json::from_str(&json)?;
    config.validate();

    tracing::debug!("Loaded engine config from {}", path.display());
    Ok(config)
}

/// Save the engine config to disk.
pub fn save_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let path = config_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;

    tracing::debug!("Saved engine config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.context_length, 4096);
        assert_eq!(config.batch_size, 512);
        assert_eq!(config.threads, 4);
        assert_eq!(config.kv_precision, KvPrecision::F16);
        assert_eq!(config.safety_margin, 32);
    }

    #[test]
    fn test_prompt_budget() {
        let config = EngineConfig::default();
        assert_eq!(config.prompt_budget(), 4096 - 32);
    }

    #[test]
    fn test_validation_clamps_ranges() {
        let mut config = EngineConfig {
            context_length: 16,
            batch_size: 0,
            threads: -2,
            kv_precision: KvPrecision::F32,
            safety_margin: 0,
        };
        config.validate();

        assert_eq!(config.context_length, 256);
        assert_eq!(config.batch_size, 256); // capped at context length
        assert_eq!(config.threads, 4);
        assert_eq!(config.safety_margin, 8);
    }

    #[test]
    fn test_validation_caps_margin() {
        let mut config = EngineConfig::default();
        config.safety_margin = 1_000_000;
        config.validate();
        assert_eq!(config.safety_margin, config.context_length / 4);
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.context_length, config.context_length);
        assert_eq!(back.kv_precision, config.kv_precision);
    }

    #[test]
    fn test_kv_precision_sizes() {
        assert_eq!(KvPrecision::F16.bytes_per_element(), 2);
        assert_eq!(KvPrecision::F32.bytes_per_element(), 4);
        assert_eq!(KvPrecision::F16.label(), "f16");
    }
}
