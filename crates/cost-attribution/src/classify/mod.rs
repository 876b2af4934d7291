//! Cost classification.
//!
//! Two independent rules run per record:
//!
//! - **Network direction** - labels `AmazonEC2` / `Data Transfer` line items
//!   as inbound or outbound traffic.
//! - **Savings-plan normalization** - zeroes the headline costs of covered
//!   usage (the commitment line carries the real charge) and computes a single
//!   amortized cost usable across line item types.
//!
//! Rules whose input columns are missing from the batch schema are disabled
//! once per run, not per record.

mod network;
mod savings_plan;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AttributionError;
use crate::records::{columns, CostRecord, DataTransferDirection, RecordSchema};

pub use network::{
    detect_direction, direction_from_usage, is_network_record, NETWORK_PRODUCT_CODE,
    NETWORK_PRODUCT_FAMILY,
};
pub use savings_plan::{
    amortized_cost, is_covered_usage, zero_covered_usage, COVERED_USAGE,
    UNBLENDED_LINE_ITEM_TYPES,
};

/// Rule name for direction detection.
pub const RULE_NETWORK_DIRECTION: &str = "network_direction";
/// Rule name for covered-usage zeroing.
pub const RULE_SAVINGS_PLAN_ZEROING: &str = "savings_plan_zeroing";
/// Rule name for amortized cost.
pub const RULE_AMORTIZED_COST: &str = "amortized_cost";

const NETWORK_DIRECTION_COLUMNS: &[&str] = &[columns::PRODUCT_CODE, columns::PRODUCT_FAMILY];
const SAVINGS_PLAN_ZEROING_COLUMNS: &[&str] =
    &[columns::LINE_ITEM_TYPE, columns::SAVINGS_PLAN_EFFECTIVE_COST];
const AMORTIZED_COST_COLUMNS: &[&str] = &[columns::LINE_ITEM_TYPE, columns::UNBLENDED_COST];

/// Per-run classification counters. Additive across chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    /// Records labeled as inbound transfer.
    pub network_in: u64,
    /// Records labeled as outbound transfer.
    pub network_out: u64,
    /// Covered-usage records whose costs were zeroed.
    pub covered_usage_zeroed: u64,
    /// Sum of amortized cost over classified records.
    pub total_amortized_cost: Decimal,
}

impl ClassificationStats {
    /// Count one classified record.
    pub fn observe(&mut self, record: &CostRecord, zeroed: bool) {
        match record.data_transfer_direction {
            Some(DataTransferDirection::In) => self.network_in += 1,
            Some(DataTransferDirection::Out) => self.network_out += 1,
            None => {}
        }
        if zeroed {
            self.covered_usage_zeroed += 1;
        }
        self.total_amortized_cost += record.amortized_cost;
    }

    /// Merge counters from another run or chunk.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.network_in += other.network_in;
        self.network_out += other.network_out;
        self.covered_usage_zeroed += other.covered_usage_zeroed;
        self.total_amortized_cost += other.total_amortized_cost;
        self
    }
}

/// Applies the classification rules enabled for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CostClassifier {
    network_direction: bool,
    savings_plan_zeroing: bool,
    amortized_cost: bool,
}

impl Default for CostClassifier {
    fn default() -> Self {
        Self {
            network_direction: true,
            savings_plan_zeroing: true,
            amortized_cost: true,
        }
    }
}

impl CostClassifier {
    /// Build a classifier for a batch schema.
    ///
    /// Returns the classifier plus one [`AttributionError::MissingColumn`]
    /// per disabled rule. Each is logged once here.
    #[must_use]
    pub fn for_schema(schema: &RecordSchema) -> (Self, Vec<AttributionError>) {
        let mut disabled = Vec::new();
        let mut check = |rule: &'static str, required: &[&'static str]| {
            match required.iter().copied().find(|c| !schema.has(c)) {
                Some(column) => {
                    warn!(rule, column, "Disabling classification rule: column missing from schema");
                    disabled.push(AttributionError::MissingColumn { rule, column });
                    false
                }
                None => true,
            }
        };

        let classifier = Self {
            network_direction: check(RULE_NETWORK_DIRECTION, NETWORK_DIRECTION_COLUMNS),
            savings_plan_zeroing: check(RULE_SAVINGS_PLAN_ZEROING, SAVINGS_PLAN_ZEROING_COLUMNS),
            amortized_cost: check(RULE_AMORTIZED_COST, AMORTIZED_COST_COLUMNS),
        };

        (classifier, disabled)
    }

    /// Whether direction detection runs.
    #[must_use]
    pub fn detects_direction(&self) -> bool {
        self.network_direction
    }

    /// Whether covered-usage zeroing runs.
    #[must_use]
    pub fn zeroes_covered_usage(&self) -> bool {
        self.savings_plan_zeroing
    }

    /// Whether amortized cost is computed.
    #[must_use]
    pub fn computes_amortized_cost(&self) -> bool {
        self.amortized_cost
    }

    /// Classify one record.
    ///
    /// Returns the record and whether covered-usage costs were zeroed.
    /// Safe to run more than once: an existing direction is kept and
    /// zeroing an already-zero record is a no-op.
    #[must_use]
    pub fn classify(&self, mut record: CostRecord) -> (CostRecord, bool) {
        if self.network_direction && record.data_transfer_direction.is_none() {
            record.data_transfer_direction = detect_direction(&record);
        }

        let zeroed = self.savings_plan_zeroing && zero_covered_usage(&mut record);

        if self.amortized_cost {
            record.amortized_cost = amortized_cost(
                &record.line_item_type,
                record.unblended_cost,
                record.savings_plan_effective_cost,
            );
        }

        (record, zeroed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_full_schema_enables_everything() {
        let (classifier, disabled) = CostClassifier::for_schema(&RecordSchema::full());
        assert!(disabled.is_empty());
        assert_eq!(classifier, CostClassifier::default());
    }

    #[test]
    fn test_missing_product_family_disables_direction_only() {
        let schema = RecordSchema::full().without(columns::PRODUCT_FAMILY);
        let (classifier, disabled) = CostClassifier::for_schema(&schema);

        assert!(!classifier.detects_direction());
        assert!(classifier.zeroes_covered_usage());
        assert!(classifier.computes_amortized_cost());
        assert_eq!(disabled.len(), 1);
        assert!(matches!(
            disabled[0],
            AttributionError::MissingColumn {
                rule: RULE_NETWORK_DIRECTION,
                column: "product_family"
            }
        ));

        let rec = CostRecord::new("AmazonEC2", "Usage", Utc::now())
            .with_product_family("Data Transfer")
            .with_usage_type("US-DataTransfer-Out-Bytes");
        let (out, _) = classifier.classify(rec);
        assert!(out.data_transfer_direction.is_none());
    }

    #[test]
    fn test_covered_usage_classification() {
        let classifier = CostClassifier::default();
        let rec = CostRecord::new("AmazonEC2", COVERED_USAGE, Utc::now())
            .with_costs(Decimal::new(50, 1), Decimal::new(50, 1))
            .with_savings_plan_effective_cost(Decimal::new(125, 1));

        let (out, zeroed) = classifier.classify(rec);
        assert!(zeroed);
        assert_eq!(out.unblended_cost, Decimal::ZERO);
        assert_eq!(out.blended_cost, Decimal::ZERO);
        assert_eq!(out.amortized_cost, Decimal::new(125, 1));

        let (again, zeroed_again) = classifier.classify(out.clone());
        assert!(!zeroed_again);
        assert_eq!(again, out);
    }

    #[test]
    fn test_stats_merge() {
        let classifier = CostClassifier::default();
        let rec = CostRecord::new("AmazonEC2", "Usage", Utc::now())
            .with_product_family("Data Transfer")
            .with_usage_type("US-DataTransfer-In-Bytes")
            .with_costs(Decimal::TWO, Decimal::TWO);
        let (out, zeroed) = classifier.classify(rec);

        let mut a = ClassificationStats::default();
        a.observe(&out, zeroed);
        let mut b = ClassificationStats::default();
        b.observe(&out, zeroed);

        let merged = a.merge(b);
        assert_eq!(merged.network_in, 2);
        assert_eq!(merged.network_out, 0);
        assert_eq!(merged.total_amortized_cost, Decimal::new(4, 0));
    }
}
