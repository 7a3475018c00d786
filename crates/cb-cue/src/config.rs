//! Engine configuration

use std::path::Path;

use cb_core::{CueError, CueResult};
use serde::{Deserialize, Serialize};

/// Multiplier applied by `AudioCategory::set_volume`
///
/// Content was mixed against a boosted category bus, so every explicit
/// volume change is scaled by this factor.
pub const DEFAULT_CATEGORY_VOLUME_BOOST: f32 = 2.5;

/// Weight applied to every volume-curve contribution before summing
///
/// Exaggerates ducking driven by volume RPC curves.
pub const DEFAULT_RPC_VOLUME_WEIGHT: f32 = 1.5;

/// Largest streamed entry the content pipeline emits (bytes)
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 5_570_141;

/// Number of preallocated streaming buffers
pub const DEFAULT_STREAM_POOL_SLOTS: usize = 2;

/// File extension of streamed entries
pub const DEFAULT_STREAM_EXTENSION: &str = "mp3";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Multiplier applied on explicit category volume changes
    pub category_volume_boost: f32,
    /// Weight applied to volume-curve outputs
    pub rpc_volume_weight: f32,
    /// Size of each pooled streaming buffer (bytes)
    pub stream_buffer_size: usize,
    /// Number of pooled streaming buffers
    pub stream_pool_slots: usize,
    /// Extension of streamed entry files
    pub stream_extension: String,
    /// RNG seed (None = seed from the OS)
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            category_volume_boost: DEFAULT_CATEGORY_VOLUME_BOOST,
            rpc_volume_weight: DEFAULT_RPC_VOLUME_WEIGHT,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            stream_pool_slots: DEFAULT_STREAM_POOL_SLOTS,
            stream_extension: DEFAULT_STREAM_EXTENSION.to_string(),
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> CueResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> CueResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| CueError::Config(e.to_string()))
    }

    pub fn with_category_volume_boost(mut self, boost: f32) -> Self {
        self.category_volume_boost = boost;
        self
    }

    pub fn with_rpc_volume_weight(mut self, weight: f32) -> Self {
        self.rpc_volume_weight = weight;
        self
    }

    pub fn with_stream_buffer_size(mut self, bytes: usize) -> Self {
        self.stream_buffer_size = bytes;
        self
    }

    pub fn with_stream_pool_slots(mut self, slots: usize) -> Self {
        self.stream_pool_slots = slots;
        self
    }

    pub fn with_stream_extension(mut self, ext: impl Into<String>) -> Self {
        self.stream_extension = ext.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.category_volume_boost, 2.5);
        assert_eq!(config.rpc_volume_weight, 1.5);
        assert_eq!(config.stream_pool_slots, 2);
        assert_eq!(config.stream_extension, "mp3");
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "seed": 7, "stream_extension": "ogg" }"#).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.stream_extension, "ogg");
        assert_eq!(config.rpc_volume_weight, DEFAULT_RPC_VOLUME_WEIGHT);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(CueError::Config(_))
        ));
        match EngineConfig::from_json(r#"{ "seed": "seven" }"#) {
            Err(CueError::Config(message)) => assert!(message.contains("invalid type")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(dir.path().join("engine.json")),
            Err(CueError::Io(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_seed(42)
            .with_stream_buffer_size(1024)
            .with_stream_pool_slots(1)
            .with_category_volume_boost(1.0);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.stream_buffer_size, 1024);
        assert_eq!(config.stream_pool_slots, 1);
        assert_eq!(config.category_volume_boost, 1.0);
    }
}
