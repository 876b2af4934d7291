//! Chunk and run statistics.

use serde::Serialize;

use super::RecordOutcome;
use crate::classify::ClassificationStats;
use crate::error::{AttributionError, Result};
use crate::identity::IndexBuildReport;
use crate::matching::{MatchStats, QualityWarning};
use crate::records::CostRecord;

/// Statistics of one chunk (or any merge of chunks).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    /// Match counters.
    pub matching: MatchStats,
    /// Classification counters.
    pub classification: ClassificationStats,
}

impl ChunkStats {
    /// Count one processed record.
    pub fn observe(&mut self, record: &CostRecord, outcome: RecordOutcome) {
        self.classification
            .observe(record, outcome.covered_usage_zeroed);
        self.matching.observe(record, outcome.matched);
    }

    /// Merge with another chunk's statistics.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            matching: self.matching.merge(other.matching),
            classification: self.classification.merge(other.classification),
        }
    }
}

/// A rule disabled for the run because its input column is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisabledRule {
    /// Rule name.
    pub rule: &'static str,
    /// First missing column.
    pub column: &'static str,
}

/// End-of-run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Match counters across completed chunks.
    pub matching: MatchStats,
    /// Classification counters across completed chunks.
    pub classification: ClassificationStats,
    /// Identity index build summary.
    pub index: IndexBuildReport,
    /// Rules disabled by the batch schema.
    pub disabled_rules: Vec<DisabledRule>,
    /// Configured match-rate floor.
    pub min_combined_match_rate: f64,
    /// Warning raised when the combined match rate is below the floor.
    pub quality_warning: Option<QualityWarning>,
    /// Chunks completed.
    pub chunks_processed: u64,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl RunStatistics {
    pub(crate) fn new(
        totals: ChunkStats,
        index: IndexBuildReport,
        disabled_rules: Vec<DisabledRule>,
        min_combined_match_rate: f64,
        chunks_processed: u64,
        cancelled: bool,
    ) -> Self {
        let quality_warning = totals.matching.quality_warning(min_combined_match_rate);
        Self {
            matching: totals.matching,
            classification: totals.classification,
            index,
            disabled_rules,
            min_combined_match_rate,
            quality_warning,
            chunks_processed,
            cancelled,
        }
    }

    /// Fraction of records attributed by resource id or tag.
    #[must_use]
    pub fn combined_match_rate(&self) -> f64 {
        self.matching.combined_match_rate()
    }

    /// Cost records plus workload records with unparseable tags or labels.
    #[must_use]
    pub fn unparseable_tag_records(&self) -> u64 {
        self.matching.unparseable_tag_records + self.index.label_parse_failures
    }

    /// Fail if the combined match rate is below the configured floor.
    ///
    /// # Errors
    ///
    /// Returns [`AttributionError::Validation`] carrying the quality warning.
    pub fn ensure_min_match_rate(&self) -> Result<()> {
        match &self.quality_warning {
            Some(warning) => Err(AttributionError::Validation(warning.to_string())),
            None => Ok(()),
        }
    }

    /// Render as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchOutcome;
    use chrono::Utc;

    fn stats_with(resource: u64, unmatched: u64) -> ChunkStats {
        let mut stats = ChunkStats::default();
        let record = CostRecord::new("AmazonEC2", "Usage", Utc::now());
        for _ in 0..resource {
            stats.observe(
                &record,
                RecordOutcome {
                    matched: MatchOutcome::ResourceMatched,
                    covered_usage_zeroed: false,
                },
            );
        }
        for _ in 0..unmatched {
            stats.observe(
                &record,
                RecordOutcome {
                    matched: MatchOutcome::Unmatched,
                    covered_usage_zeroed: false,
                },
            );
        }
        stats
    }

    #[test]
    fn test_quality_gate() {
        let report = IndexBuildReport {
            workload_records: 3,
            label_parse_failures: 1,
        };
        let stats = RunStatistics::new(stats_with(1, 3), report, Vec::new(), 0.7, 1, false);

        assert!(stats.quality_warning.is_some());
        assert!(matches!(
            stats.ensure_min_match_rate(),
            Err(AttributionError::Validation(_))
        ));
        assert_eq!(stats.unparseable_tag_records(), 1);

        let stats = RunStatistics::new(stats_with(3, 1), report, Vec::new(), 0.7, 1, false);
        assert!(stats.quality_warning.is_none());
        assert!(stats.ensure_min_match_rate().is_ok());
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = RunStatistics::new(
            stats_with(1, 0),
            IndexBuildReport::default(),
            vec![DisabledRule {
                rule: "network_direction",
                column: "product_family",
            }],
            0.7,
            1,
            false,
        );
        let json = stats.to_json().unwrap();
        assert!(json.contains("\"network_direction\""));
        assert!(json.contains("\"resource_matched\": 1"));
    }
}
