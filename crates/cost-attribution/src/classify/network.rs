//! Network data-transfer direction detection.

use crate::records::{CostRecord, DataTransferDirection};

/// Product code of records eligible for direction detection.
pub const NETWORK_PRODUCT_CODE: &str = "AmazonEC2";

/// Product family of records eligible for direction detection.
pub const NETWORK_PRODUCT_FAMILY: &str = "Data Transfer";

/// Whether a record is a network data-transfer line item.
#[must_use]
pub fn is_network_record(record: &CostRecord) -> bool {
    record.product_code == NETWORK_PRODUCT_CODE
        && record.product_family.as_deref() == Some(NETWORK_PRODUCT_FAMILY)
}

/// Derive the transfer direction from usage type and operation.
///
/// Checks run in order and the first hit wins:
/// `in-bytes`, `out-bytes`, then `regional-bytes` qualified by an
/// operation containing `-in` or `-out`.
#[must_use]
pub fn direction_from_usage(
    usage_type: &str,
    operation: Option<&str>,
) -> Option<DataTransferDirection> {
    let usage = usage_type.to_lowercase();
    let operation = operation.map(str::to_lowercase).unwrap_or_default();

    if usage.contains("in-bytes") {
        Some(DataTransferDirection::In)
    } else if usage.contains("out-bytes") {
        Some(DataTransferDirection::Out)
    } else if usage.contains("regional-bytes") && operation.contains("-in") {
        Some(DataTransferDirection::In)
    } else if usage.contains("regional-bytes") && operation.contains("-out") {
        Some(DataTransferDirection::Out)
    } else {
        None
    }
}

/// Direction for a record, or `None` for non-network and unrecognized records.
#[must_use]
pub fn detect_direction(record: &CostRecord) -> Option<DataTransferDirection> {
    if !is_network_record(record) {
        return None;
    }
    let usage_type = record.usage_type.as_deref()?;
    direction_from_usage(usage_type, record.operation.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn network(usage_type: &str) -> CostRecord {
        CostRecord::new("AmazonEC2", "Usage", Utc::now())
            .with_product_family("Data Transfer")
            .with_usage_type(usage_type)
    }

    #[test]
    fn test_out_bytes() {
        let rec = network("US-DataTransfer-Out-Bytes");
        assert_eq!(detect_direction(&rec), Some(DataTransferDirection::Out));
    }

    #[test]
    fn test_in_bytes_case_insensitive() {
        let rec = network("USE1-DATATRANSFER-IN-BYTES");
        assert_eq!(detect_direction(&rec), Some(DataTransferDirection::In));
    }

    #[test]
    fn test_regional_bytes_uses_operation() {
        let rec = network("USE1-DataTransfer-Regional-Bytes").with_operation("InterAZ-in");
        assert_eq!(detect_direction(&rec), Some(DataTransferDirection::In));

        let rec = network("USE1-DataTransfer-Regional-Bytes").with_operation("InterZone-Out");
        assert_eq!(detect_direction(&rec), Some(DataTransferDirection::Out));

        let rec = network("USE1-DataTransfer-Regional-Bytes");
        assert_eq!(detect_direction(&rec), None);
    }

    #[test]
    fn test_non_network_never_gets_direction() {
        let rec = CostRecord::new("AmazonEC2", "Usage", Utc::now())
            .with_product_family("Compute")
            .with_usage_type("US-DataTransfer-Out-Bytes");
        assert_eq!(detect_direction(&rec), None);

        let rec = CostRecord::new("AmazonS3", "Usage", Utc::now())
            .with_product_family("Data Transfer")
            .with_usage_type("US-DataTransfer-Out-Bytes");
        assert_eq!(detect_direction(&rec), None);
    }

    #[test]
    fn test_missing_usage_type() {
        let rec = CostRecord::new("AmazonEC2", "Usage", Utc::now()).with_product_family("Data Transfer");
        assert_eq!(detect_direction(&rec), None);
    }
}
