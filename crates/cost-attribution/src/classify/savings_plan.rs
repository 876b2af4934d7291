//! Savings-plan cost normalization.

use rust_decimal::Decimal;

use crate::records::CostRecord;

/// Informational line marking usage paid for by a savings plan.
pub const COVERED_USAGE: &str = "SavingsPlanCoveredUsage";

/// Line item types whose amortized cost is their unblended cost.
pub const UNBLENDED_LINE_ITEM_TYPES: &[&str] = &["Tax", "Usage"];

/// Whether a record is covered usage with a real effective cost.
///
/// A zero, negative or missing effective cost does not count as covered.
#[must_use]
pub fn is_covered_usage(record: &CostRecord) -> bool {
    record.line_item_type == COVERED_USAGE
        && record
            .savings_plan_effective_cost
            .is_some_and(|cost| cost > Decimal::ZERO)
}

/// Zero the headline costs of covered usage.
///
/// Returns `true` if any cost was changed.
pub fn zero_covered_usage(record: &mut CostRecord) -> bool {
    if !is_covered_usage(record) {
        return false;
    }
    let changed = !record.unblended_cost.is_zero() || !record.blended_cost.is_zero();
    record.unblended_cost = Decimal::ZERO;
    record.blended_cost = Decimal::ZERO;
    changed
}

/// Amortized cost for a line item.
///
/// Tax and on-demand usage carry their unblended cost; every other line item
/// type carries its savings-plan effective cost (zero when absent).
#[must_use]
pub fn amortized_cost(
    line_item_type: &str,
    unblended_cost: Decimal,
    savings_plan_effective_cost: Option<Decimal>,
) -> Decimal {
    if UNBLENDED_LINE_ITEM_TYPES.contains(&line_item_type) {
        unblended_cost
    } else {
        savings_plan_effective_cost.unwrap_or(Decimal::ZERO)
    }
}
