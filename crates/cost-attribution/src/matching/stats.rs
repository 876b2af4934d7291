//! Match statistics and the combined match-rate quality gate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::MatchOutcome;
use crate::records::{CostRecord, MatchedIdentityKind};

/// Per-run match counters.
///
/// Built per worker and merged; merging is associative and commutative, so
/// chunks and workers can be combined in any order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    /// Records seen.
    pub total_records: u64,
    /// Records matched upstream by resource id.
    pub resource_matched: u64,
    /// Records matched by tag (including ones matched by a previous run).
    pub tag_matched: u64,
    /// Records attributed by neither.
    pub unmatched: u64,
    /// Tag matches per identity kind.
    pub by_kind: BTreeMap<MatchedIdentityKind, u64>,
    /// Records whose tag payload could not be parsed.
    pub unparseable_tag_records: u64,
    /// Amortized cost of resource-matched records.
    pub resource_matched_cost: Decimal,
    /// Amortized cost of tag-matched records.
    pub tag_matched_cost: Decimal,
    /// Amortized cost of unmatched records.
    pub unmatched_cost: Decimal,
}

impl MatchStats {
    /// Count one record after matching.
    pub fn observe(&mut self, record: &CostRecord, outcome: MatchOutcome) {
        self.total_records += 1;
        if record.tag_parse_failed {
            self.unparseable_tag_records += 1;
        }

        match outcome {
            MatchOutcome::ResourceMatched => {
                self.resource_matched += 1;
                self.resource_matched_cost += record.amortized_cost;
            }
            MatchOutcome::TagMatched { kind, .. } => {
                self.tag_matched += 1;
                *self.by_kind.entry(kind).or_default() += 1;
                self.tag_matched_cost += record.amortized_cost;
            }
            MatchOutcome::Unmatched => {
                self.unmatched += 1;
                self.unmatched_cost += record.amortized_cost;
            }
        }
    }

    /// Merge counters from another worker or chunk.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.total_records += other.total_records;
        self.resource_matched += other.resource_matched;
        self.tag_matched += other.tag_matched;
        self.unmatched += other.unmatched;
        for (kind, count) in other.by_kind {
            *self.by_kind.entry(kind).or_default() += count;
        }
        self.unparseable_tag_records += other.unparseable_tag_records;
        self.resource_matched_cost += other.resource_matched_cost;
        self.tag_matched_cost += other.tag_matched_cost;
        self.unmatched_cost += other.unmatched_cost;
        self
    }

    /// Tag matches of one kind.
    #[must_use]
    pub fn count(&self, kind: MatchedIdentityKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Fraction of records attributed by resource id or tag (0 when empty).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Expected for statistical calculations
    pub fn combined_match_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.resource_matched + self.tag_matched) as f64 / self.total_records as f64
    }

    /// The quality warning for a floor, if the rate falls below it.
    ///
    /// An empty run never warns.
    #[must_use]
    pub fn quality_warning(&self, min_combined_match_rate: f64) -> Option<QualityWarning> {
        let rate = self.combined_match_rate();
        (self.total_records > 0 && rate < min_combined_match_rate).then_some(QualityWarning {
            combined_match_rate: rate,
            min_combined_match_rate,
        })
    }
}

/// Non-fatal signal that too little cost was attributed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWarning {
    /// Observed combined match rate.
    pub combined_match_rate: f64,
    /// Configured floor.
    pub min_combined_match_rate: f64,
}

impl std::fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "combined match rate {:.1}% is below the {:.1}% floor",
            self.combined_match_rate * 100.0,
            self.min_combined_match_rate * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(cost: i64) -> CostRecord {
        let mut rec = CostRecord::new("AmazonEC2", "Usage", Utc::now());
        rec.amortized_cost = Decimal::new(cost, 0);
        rec
    }

    #[test]
    fn test_observe_and_rate() {
        let mut stats = MatchStats::default();
        stats.observe(&record(5), MatchOutcome::ResourceMatched);
        stats.observe(
            &record(3),
            MatchOutcome::TagMatched {
                kind: MatchedIdentityKind::Node,
                fresh: true,
            },
        );
        stats.observe(&record(2), MatchOutcome::Unmatched);
        stats.observe(&record(1), MatchOutcome::Unmatched);

        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.count(MatchedIdentityKind::Node), 1);
        assert_eq!(stats.count(MatchedIdentityKind::Cluster), 0);
        assert!((stats.combined_match_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.unmatched_cost, Decimal::new(3, 0));

        let warning = stats.quality_warning(0.7).unwrap();
        assert!(warning.to_string().contains("50.0%"));
        assert!(stats.quality_warning(0.5).is_none());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = MatchStats::default();
        a.observe(&record(1), MatchOutcome::ResourceMatched);
        let mut b = MatchStats::default();
        b.observe(
            &record(2),
            MatchOutcome::TagMatched {
                kind: MatchedIdentityKind::PodLabel,
                fresh: true,
            },
        );

        assert_eq!(a.clone().merge(b.clone()), b.merge(a));
    }

    #[test]
    fn test_empty_run_never_warns() {
        let stats = MatchStats::default();
        assert!(stats.combined_match_rate().abs() < f64::EPSILON);
        assert!(stats.quality_warning(0.7).is_none());
    }
}
