//! Streaming vs. in-memory execution decision.
//!
//! Precedence, highest first:
//!
//! 1. an explicit override from the caller
//! 2. a non-`auto` `use_streaming` setting
//! 3. auto-detection: stream if the estimated row count exceeds the row
//!    threshold, or available memory is below the memory threshold
//!
//! An unknown row count or unavailable memory telemetry removes that signal
//! from consideration rather than failing.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

use crate::config::{AttributionConfig, StreamingSetting};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of live memory telemetry.
pub trait MemoryProbe: Send + Sync {
    /// Currently available memory in bytes, or `None` if unknown.
    fn available_memory_bytes(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
///
/// Reports `None` only on platforms sysinfo does not support. A reading of
/// zero bytes is passed through and triggers the low-memory signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_memory_bytes(&self) -> Option<u64> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let mut sys = System::new();
        sys.refresh_memory();
        Some(sys.available_memory())
    }
}

/// A probe reporting a fixed value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMemoryProbe(pub Option<u64>);

impl FixedMemoryProbe {
    /// A probe reporting `gb` gigabytes available.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn gigabytes(gb: f64) -> Self {
        Self(Some((gb * BYTES_PER_GB) as u64))
    }

    /// A probe with no telemetry.
    #[must_use]
    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn available_memory_bytes(&self) -> Option<u64> {
        self.0
    }
}

/// Why a mode was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingReason {
    /// The caller forced the mode.
    Override,
    /// `use_streaming` was `true` or `false`.
    Configured,
    /// Estimated rows exceeded the row threshold.
    RowCount,
    /// Available memory was below the memory threshold.
    LowMemory,
    /// Neither auto-detection signal triggered.
    BelowThresholds,
}

/// The selector's decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamingDecision {
    /// Whether to process in bounded chunks.
    pub stream: bool,
    /// What drove the decision.
    pub reason: StreamingReason,
    /// Rows per chunk when streaming.
    pub chunk_size: Option<usize>,
    /// Row estimate the decision was made with.
    pub estimated_rows: Option<u64>,
    /// Available memory observed, when it was consulted.
    pub available_memory_gb: Option<f64>,
}

/// Decides between streaming and in-memory processing.
#[derive(Debug, Clone)]
pub struct StreamingModeSelector<P = SystemMemoryProbe> {
    setting: StreamingSetting,
    threshold_rows: u64,
    memory_threshold_gb: f64,
    chunk_size: usize,
    probe: P,
}

impl StreamingModeSelector<SystemMemoryProbe> {
    /// Selector reading live memory from the operating system.
    #[must_use]
    pub fn from_config(config: &AttributionConfig) -> Self {
        Self::with_probe(config, SystemMemoryProbe)
    }
}

impl<P: MemoryProbe> StreamingModeSelector<P> {
    /// Selector with a custom memory probe.
    #[must_use]
    pub fn with_probe(config: &AttributionConfig, probe: P) -> Self {
        Self {
            setting: config.use_streaming,
            threshold_rows: config.streaming_threshold_rows,
            memory_threshold_gb: config.streaming_memory_threshold_gb,
            chunk_size: config.chunk_size_rows,
            probe,
        }
    }

    /// Decide the execution mode.
    #[must_use]
    pub fn decide(&self, force_mode: Option<bool>, estimated_rows: Option<u64>) -> StreamingDecision {
        let decision = if let Some(stream) = force_mode {
            self.decision(stream, StreamingReason::Override, estimated_rows, None)
        } else if let Some(stream) = self.setting.forced() {
            self.decision(stream, StreamingReason::Configured, estimated_rows, None)
        } else {
            self.auto_detect(estimated_rows)
        };

        info!(
            stream = decision.stream,
            reason = ?decision.reason,
            estimated_rows = ?decision.estimated_rows,
            available_memory_gb = ?decision.available_memory_gb,
            chunk_size = ?decision.chunk_size,
            "Selected execution mode"
        );
        decision
    }

    /// Shorthand for `decide(..).stream`.
    #[must_use]
    pub fn should_stream(&self, force_mode: Option<bool>, estimated_rows: Option<u64>) -> bool {
        self.decide(force_mode, estimated_rows).stream
    }

    #[allow(clippy::cast_precision_loss)]
    fn auto_detect(&self, estimated_rows: Option<u64>) -> StreamingDecision {
        if estimated_rows.is_some_and(|rows| rows > self.threshold_rows) {
            return self.decision(true, StreamingReason::RowCount, estimated_rows, None);
        }

        let available_gb = self
            .probe
            .available_memory_bytes()
            .map(|bytes| bytes as f64 / BYTES_PER_GB);

        match available_gb {
            Some(gb) if gb < self.memory_threshold_gb => {
                self.decision(true, StreamingReason::LowMemory, estimated_rows, Some(gb))
            }
            Some(_) => self.decision(
                false,
                StreamingReason::BelowThresholds,
                estimated_rows,
                available_gb,
            ),
            None => {
                debug!("Memory telemetry unavailable, deciding on row count alone");
                self.decision(false, StreamingReason::BelowThresholds, estimated_rows, None)
            }
        }
    }

    fn decision(
        &self,
        stream: bool,
        reason: StreamingReason,
        estimated_rows: Option<u64>,
        available_memory_gb: Option<f64>,
    ) -> StreamingDecision {
        StreamingDecision {
            stream,
            reason,
            chunk_size: stream.then_some(self.chunk_size),
            estimated_rows,
            available_memory_gb,
        }
    }
}
