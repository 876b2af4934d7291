//! Configuration for the attribution engine.
//!
//! Values come from serde defaults, optionally a TOML document, and finally
//! `COST_ATTRIBUTION_*` environment overrides.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::env;

use crate::error::{AttributionError, Result};

const ENV_ENABLED_TAG_KEYS: &str = "COST_ATTRIBUTION_ENABLED_TAG_KEYS";
const ENV_STREAMING_THRESHOLD_ROWS: &str = "COST_ATTRIBUTION_STREAMING_THRESHOLD_ROWS";
const ENV_STREAMING_MEMORY_THRESHOLD_GB: &str = "COST_ATTRIBUTION_STREAMING_MEMORY_THRESHOLD_GB";
const ENV_USE_STREAMING: &str = "COST_ATTRIBUTION_USE_STREAMING";
const ENV_CHUNK_SIZE_ROWS: &str = "COST_ATTRIBUTION_CHUNK_SIZE_ROWS";
const ENV_MIN_COMBINED_MATCH_RATE: &str = "COST_ATTRIBUTION_MIN_COMBINED_MATCH_RATE";

/// Three-valued streaming switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingSetting {
    /// Always stream in chunks.
    Enabled,
    /// Always process in memory.
    Disabled,
    /// Decide from row count and available memory.
    #[default]
    Auto,
}

impl StreamingSetting {
    /// The forced mode, or `None` for auto-detection.
    #[must_use]
    pub fn forced(self) -> Option<bool> {
        match self {
            Self::Enabled => Some(true),
            Self::Disabled => Some(false),
            Self::Auto => None,
        }
    }
}

impl std::str::FromStr for StreamingSetting {
    type Err = AttributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(Self::Enabled),
            "false" | "0" => Ok(Self::Disabled),
            "auto" => Ok(Self::Auto),
            other => Err(AttributionError::Config(format!(
                "use_streaming must be true, false or auto (got '{other}')"
            ))),
        }
    }
}

impl std::fmt::Display for StreamingSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled => write!(f, "true"),
            Self::Disabled => write!(f, "false"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl Serialize for StreamingSetting {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.forced() {
            Some(flag) => serializer.serialize_bool(flag),
            None => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for StreamingSetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Self::Enabled),
            Raw::Flag(false) => Ok(Self::Disabled),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Tag keys considered during matching. Empty means all.
    #[serde(default)]
    pub enabled_tag_keys: HashSet<String>,

    /// Estimated row count above which processing streams.
    #[serde(default = "default_streaming_threshold_rows")]
    pub streaming_threshold_rows: u64,

    /// Available memory (GB) below which processing streams.
    #[serde(default = "default_streaming_memory_threshold_gb")]
    pub streaming_memory_threshold_gb: f64,

    /// Manual streaming switch.
    #[serde(default)]
    pub use_streaming: StreamingSetting,

    /// Rows per chunk when streaming.
    #[serde(default = "default_chunk_size_rows")]
    pub chunk_size_rows: usize,

    /// Combined match rate below which a quality warning is raised.
    #[serde(default = "default_min_combined_match_rate")]
    pub min_combined_match_rate: f64,
}

const fn default_streaming_threshold_rows() -> u64 {
    500_000
}

const fn default_streaming_memory_threshold_gb() -> f64 {
    4.0
}

const fn default_chunk_size_rows() -> usize {
    100_000
}

const fn default_min_combined_match_rate() -> f64 {
    0.70
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            enabled_tag_keys: HashSet::new(),
            streaming_threshold_rows: default_streaming_threshold_rows(),
            streaming_memory_threshold_gb: default_streaming_memory_threshold_gb(),
            use_streaming: StreamingSetting::default(),
            chunk_size_rows: default_chunk_size_rows(),
            min_combined_match_rate: default_min_combined_match_rate(),
        }
    }
}

impl AttributionConfig {
    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Parse a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the result is invalid.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `COST_ATTRIBUTION_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or the result is invalid.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(keys) = env::var(ENV_ENABLED_TAG_KEYS) {
            self.enabled_tag_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(rows) = parse_env(ENV_STREAMING_THRESHOLD_ROWS)? {
            self.streaming_threshold_rows = rows;
        }
        if let Some(gb) = parse_env(ENV_STREAMING_MEMORY_THRESHOLD_GB)? {
            self.streaming_memory_threshold_gb = gb;
        }
        if let Ok(setting) = env::var(ENV_USE_STREAMING) {
            self.use_streaming = setting.parse()?;
        }
        if let Some(rows) = parse_env(ENV_CHUNK_SIZE_ROWS)? {
            self.chunk_size_rows = rows;
        }
        if let Some(rate) = parse_env(ENV_MIN_COMBINED_MATCH_RATE)? {
            self.min_combined_match_rate = rate;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AttributionError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_rows == 0 {
            return Err(AttributionError::Config(
                "chunk_size_rows must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_combined_match_rate) {
            return Err(AttributionError::Config(format!(
                "min_combined_match_rate must be within [0, 1] (got {})",
                self.min_combined_match_rate
            )));
        }
        if self.streaming_memory_threshold_gb.is_nan() || self.streaming_memory_threshold_gb < 0.0 {
            return Err(AttributionError::Config(format!(
                "streaming_memory_threshold_gb must be non-negative (got {})",
                self.streaming_memory_threshold_gb
            )));
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AttributionError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            ENV_ENABLED_TAG_KEYS,
            ENV_STREAMING_THRESHOLD_ROWS,
            ENV_STREAMING_MEMORY_THRESHOLD_GB,
            ENV_USE_STREAMING,
            ENV_CHUNK_SIZE_ROWS,
            ENV_MIN_COMBINED_MATCH_RATE,
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_defaults() {
        let config = AttributionConfig::default();
        assert_eq!(config.streaming_threshold_rows, 500_000);
        assert_eq!(config.use_streaming, StreamingSetting::Auto);
        assert!(config.enabled_tag_keys.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = AttributionConfig::from_toml_str(
            r#"
            enabled_tag_keys = ["app", "openshift_cluster"]
            use_streaming = "auto"
            streaming_threshold_rows = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.enabled_tag_keys.len(), 2);
        assert_eq!(config.streaming_threshold_rows, 1000);
        assert_eq!(config.chunk_size_rows, 100_000);

        let config = AttributionConfig::from_toml_str("use_streaming = false").unwrap();
        assert_eq!(config.use_streaming, StreamingSetting::Disabled);

        assert!(AttributionConfig::from_toml_str("use_streaming = \"sometimes\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AttributionConfig {
            chunk_size_rows: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AttributionError::Config(_))));

        let config = AttributionConfig {
            min_combined_match_rate: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_streaming_setting_parse() {
        assert_eq!("AUTO".parse::<StreamingSetting>().unwrap(), StreamingSetting::Auto);
        assert_eq!("True".parse::<StreamingSetting>().unwrap(), StreamingSetting::Enabled);
        assert!("maybe".parse::<StreamingSetting>().is_err());
        assert_eq!(StreamingSetting::Disabled.forced(), Some(false));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var(ENV_ENABLED_TAG_KEYS, "app, team,,");
        env::set_var(ENV_USE_STREAMING, "true");
        env::set_var(ENV_STREAMING_MEMORY_THRESHOLD_GB, "2.5");

        let config = AttributionConfig::from_env().unwrap();
        assert_eq!(config.enabled_tag_keys.len(), 2);
        assert!(config.enabled_tag_keys.contains("team"));
        assert_eq!(config.use_streaming, StreamingSetting::Enabled);
        assert!((config.streaming_memory_threshold_gb - 2.5).abs() < f64::EPSILON);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_parse_error() {
        clear_env();
        env::set_var(ENV_STREAMING_THRESHOLD_ROWS, "lots");

        let err = AttributionConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(ENV_STREAMING_THRESHOLD_ROWS));

        clear_env();
    }
}
