//! Error types for the attribution engine.

use thiserror::Error;

/// Errors that can occur while attributing cost records.
///
/// Only batch-level and caller-triggered conditions surface as errors.
/// Record-level problems (malformed tag payloads, unmatched records) are
/// counted in the run statistics instead.
#[derive(Error, Debug)]
pub enum AttributionError {
    /// A column required by a rule is absent from the input schema.
    ///
    /// The rule is disabled for the whole run; other rules still run.
    #[error("Missing column '{column}' required by rule '{rule}'")]
    MissingColumn {
        rule: &'static str,
        column: &'static str,
    },

    /// A tag or label payload is neither a JSON object nor `key:value|...`.
    #[error("Tag parse error: {0}")]
    TagParse(String),

    /// An explicit validation requested by the caller failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = AttributionError> = std::result::Result<T, E>;
